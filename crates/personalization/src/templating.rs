//! `{variable}` interpolation over contact fields.

use dispatch_core::types::Contact;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

fn variable_regex() -> &'static Regex {
    static VARIABLE: OnceLock<Regex> = OnceLock::new();
    VARIABLE.get_or_init(|| Regex::new(r"\{(\w+)\}").expect("variable pattern is valid"))
}

/// Distinct variable names referenced by a template, in order of first
/// appearance.
pub fn extract_template_variables(template: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for capture in variable_regex().captures_iter(template) {
        let name = capture[1].to_string();
        if !seen.contains(&name) {
            seen.push(name);
        }
    }
    seen
}

/// Render a template against a contact. `{name}` and `{phone}` map to
/// the contact's identity fields; any other `{key}` resolves to a custom
/// field (case-insensitive first, then exact), then the fallback map,
/// and otherwise stays literal.
pub fn interpolate(
    template: &str,
    contact: &Contact,
    fallback: Option<&HashMap<String, String>>,
) -> String {
    variable_regex()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let key = &caps[1];
            match key {
                "name" => return contact.name.clone(),
                "phone" => return contact.phone_number.clone(),
                _ => {}
            }

            let normalized = key.to_lowercase();
            if let Some(value) = contact.custom_fields.get(&normalized) {
                return value.clone();
            }
            if let Some(value) = contact.custom_fields.get(key) {
                return value.clone();
            }
            if let Some(value) = fallback.and_then(|f| f.get(key)) {
                return value.clone();
            }
            format!("{{{key}}}")
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn contact() -> Contact {
        let mut custom_fields = HashMap::new();
        custom_fields.insert("company".to_string(), "Acme Ltd".to_string());
        custom_fields.insert("Plan".to_string(), "gold".to_string());
        Contact {
            id: Uuid::new_v4(),
            name: "Rita".to_string(),
            phone_number: "+5511999990000".to_string(),
            custom_fields,
        }
    }

    #[test]
    fn identity_fields_resolve() {
        let rendered = interpolate("Hi {name}, confirming {phone}.", &contact(), None);
        assert_eq!(rendered, "Hi Rita, confirming +5511999990000.");
    }

    #[test]
    fn custom_fields_resolve_case_insensitively_first() {
        let rendered = interpolate("{Company} / {Plan}", &contact(), None);
        // `{Company}` lowercases onto the stored `company` key; `{Plan}`
        // misses lowercase but matches exactly.
        assert_eq!(rendered, "Acme Ltd / gold");
    }

    #[test]
    fn fallback_then_literal() {
        let mut fallback = HashMap::new();
        fallback.insert("coupon".to_string(), "WELCOME10".to_string());

        let rendered = interpolate("{coupon} for {segment}", &contact(), Some(&fallback));
        assert_eq!(rendered, "WELCOME10 for {segment}");
    }

    #[test]
    fn extracts_distinct_variables_in_order() {
        let variables = extract_template_variables("{name} {company} {name} {x}");
        assert_eq!(variables, vec!["name", "company", "x"]);
    }
}
