//! Snapshot of an ASP.NET WebForms page: hidden state fields, the current
//! value of every `<select>`, and each select's options.

use crate::models::MarketOption;
use scraper::{Html, Selector};
use std::collections::BTreeMap;

use super::cleaner::clean_cell;

#[derive(Debug, Clone, Default)]
pub struct FormState {
    /// `__VIEWSTATE`, `__EVENTVALIDATION`, … in document order.
    pub hidden: Vec<(String, String)>,
    /// Text inputs (date fields) and their current values.
    pub inputs: BTreeMap<String, String>,
    /// select id → currently selected value.
    pub selected: BTreeMap<String, String>,
    /// select id → options in page order.
    pub options: BTreeMap<String, Vec<MarketOption>>,
    pub action: Option<String>,
}

impl FormState {
    pub fn parse(html: &str) -> Self {
        let doc = Html::parse_document(html);
        let mut state = FormState::default();

        let (Ok(form_sel), Ok(hidden_sel), Ok(text_sel), Ok(select_sel), Ok(option_sel)) = (
            Selector::parse("form"),
            Selector::parse(r#"input[type="hidden"]"#),
            Selector::parse(r#"input[type="text"]"#),
            Selector::parse("select"),
            Selector::parse("option"),
        ) else {
            return state;
        };

        state.action = doc
            .select(&form_sel)
            .next()
            .and_then(|f| f.value().attr("action"))
            .map(|a| a.to_string());

        for input in doc.select(&hidden_sel) {
            if let Some(name) = input.value().attr("name") {
                let value = input.value().attr("value").unwrap_or_default();
                state.hidden.push((name.to_string(), value.to_string()));
            }
        }

        for input in doc.select(&text_sel) {
            if let Some(name) = input.value().attr("name") {
                let value = input.value().attr("value").unwrap_or_default();
                state.inputs.insert(name.to_string(), value.to_string());
            }
        }

        for select in doc.select(&select_sel) {
            let Some(id) = select.value().attr("name").or_else(|| select.value().attr("id")) else {
                continue;
            };
            let mut opts = Vec::new();
            let mut selected = None;
            for opt in select.select(&option_sel) {
                let label = clean_cell(&opt.text().collect::<String>());
                let value = opt.value().attr("value").map(str::to_string).unwrap_or_else(|| label.clone());
                if opt.value().attr("selected").is_some() {
                    selected = Some(value.clone());
                }
                opts.push(MarketOption::new(value, label));
            }
            let current = selected.or_else(|| opts.first().map(|o| o.id.clone())).unwrap_or_default();
            state.selected.insert(id.to_string(), current);
            state.options.insert(id.to_string(), opts);
        }

        state
    }

    /// True once the page carries the WebForms state we must echo back.
    pub fn has_viewstate(&self) -> bool {
        self.hidden.iter().any(|(k, _)| k == "__VIEWSTATE")
    }

    pub fn has_select(&self, name: &str) -> bool {
        self.options.contains_key(name)
    }

    /// Real options of a select, without the "-- Select --" placeholder.
    pub fn real_options(&self, name: &str) -> Vec<MarketOption> {
        self.options
            .get(name)
            .map(|opts| opts.iter().filter(|o| !is_placeholder(o)).cloned().collect())
            .unwrap_or_default()
    }

    /// Field list for a postback. `event_target` is empty for a button submit.
    pub fn postback_fields(&self, event_target: &str) -> Vec<(String, String)> {
        let mut fields: Vec<(String, String)> = self
            .hidden
            .iter()
            .filter(|(k, _)| k != "__EVENTTARGET" && k != "__EVENTARGUMENT")
            .cloned()
            .collect();
        fields.push(("__EVENTTARGET".into(), event_target.into()));
        fields.push(("__EVENTARGUMENT".into(), String::new()));
        fields.extend(self.selected.iter().map(|(k, v)| (k.clone(), v.clone())));
        fields.extend(self.inputs.iter().map(|(k, v)| (k.clone(), v.clone())));
        fields
    }
}

/// The form's "unselected" sentinel: value "0", empty, or a dashed prompt.
pub fn is_placeholder(opt: &MarketOption) -> bool {
    let v = opt.id.trim();
    let l = opt.label.trim().to_lowercase();
    v.is_empty() || v == "0" || l.starts_with("--") || l == "select" || l.starts_with("-select")
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// Minimal search page in the shape of the market site's WebForms form.
    pub fn search_page(viewstate: &str, districts: &[(&str, &str)], markets: &[(&str, &str)]) -> String {
        let opts = |items: &[(&str, &str)]| {
            items
                .iter()
                .map(|(v, l)| format!(r#"<option value="{v}">{l}</option>"#))
                .collect::<String>()
        };
        format!(
            r#"<html><body><form method="post" action="./SearchCmmMkt.aspx" id="form1">
            <input type="hidden" name="__VIEWSTATE" value="{viewstate}" />
            <input type="hidden" name="__VIEWSTATEGENERATOR" value="B3BE3C7C" />
            <input type="hidden" name="__EVENTVALIDATION" value="ev-{viewstate}" />
            <select name="ddlArrivalPrice" id="ddlArrivalPrice">
              <option value="0" selected="selected">Price</option><option value="1">Arrival</option></select>
            <select name="ddlCommodity" id="ddlCommodity">
              <option value="0">--Select--</option><option value="78">Tomato</option>
              <option value="23">Onion</option><option value="24">Potato</option></select>
            <select name="ddlState" id="ddlState">
              <option value="0">--Select--</option><option value="MH">Maharashtra</option>
              <option value="DL">NCT of Delhi</option></select>
            <select name="ddlDistrict" id="ddlDistrict"><option value="0">--Select--</option>{districts}</select>
            <select name="ddlMarket" id="ddlMarket"><option value="0">--Select--</option>{markets}</select>
            <input type="text" name="txtDate" id="txtDate" value="" />
            <input type="text" name="txtDateTo" id="txtDateTo" value="" />
            <input type="submit" name="btnGo" value="Go" id="btnGo" />
            </form></body></html>"#,
            districts = opts(districts),
            markets = opts(markets),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::search_page;
    use super::*;

    #[test]
    fn test_parse_search_page() {
        let html = search_page("vs1", &[("12", "Pune"), ("13", "Mumbai")], &[]);
        let state = FormState::parse(&html);

        assert!(state.has_viewstate());
        assert_eq!(state.action.as_deref(), Some("./SearchCmmMkt.aspx"));
        assert_eq!(state.selected.get("ddlArrivalPrice").map(String::as_str), Some("0"));
        assert_eq!(state.selected.get("ddlCommodity").map(String::as_str), Some("0"));
        assert_eq!(
            state.real_options("ddlDistrict"),
            vec![MarketOption::new("12", "Pune"), MarketOption::new("13", "Mumbai")]
        );
        assert!(state.real_options("ddlMarket").is_empty());
        assert!(state.inputs.contains_key("txtDate"));
    }

    #[test]
    fn test_postback_fields_carry_state() {
        let mut state = FormState::parse(&search_page("vs2", &[], &[]));
        state.selected.insert("ddlState".into(), "MH".into());
        let fields = state.postback_fields("ddlState");

        let get = |k: &str| fields.iter().find(|(n, _)| n == k).map(|(_, v)| v.as_str());
        assert_eq!(get("__VIEWSTATE"), Some("vs2"));
        assert_eq!(get("__EVENTTARGET"), Some("ddlState"));
        assert_eq!(get("ddlState"), Some("MH"));
        assert_eq!(fields.iter().filter(|(n, _)| n == "__EVENTTARGET").count(), 1);
    }

    #[test]
    fn test_placeholders() {
        assert!(is_placeholder(&MarketOption::new("0", "--Select--")));
        assert!(is_placeholder(&MarketOption::new("", "Pune")));
        assert!(is_placeholder(&MarketOption::new("x", "-- Select Market --")));
        assert!(!is_placeholder(&MarketOption::new("215", "Pune(Pimpri)")));
    }

    #[test]
    fn test_page_without_form() {
        let state = FormState::parse("<html><body>Service Unavailable</body></html>");
        assert!(!state.has_viewstate());
        assert!(!state.has_select("ddlState"));
    }
}
