use std::time::Instant;
use tracing::info;

/// Logs the wall-clock time of a CLI operation when dropped.
pub struct Timer {
    label: &'static str,
    start: Instant,
}

impl Timer {
    pub fn start(label: &'static str) -> Self {
        info!("⏱  {}…", label);
        Self { label, start: Instant::now() }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        info!("⏱  {} took {:.2?}", self.label, self.start.elapsed());
    }
}

/// Group digits the Indian way: last three, then pairs (12,34,567).
pub fn fmt_count(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let (head, tail) = digits.split_at(digits.len().saturating_sub(3));

    let mut out = String::new();
    let lead = head.len() % 2;
    for (i, ch) in head.chars().enumerate() {
        if i > 0 && (i + 2 - lead) % 2 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    if !head.is_empty() {
        out.push(',');
    }
    out.push_str(tail);

    if n < 0 { format!("-{out}") } else { out }
}

pub fn fmt_rupees(amount: f64) -> String {
    format!("₹{:.2}", amount)
}
