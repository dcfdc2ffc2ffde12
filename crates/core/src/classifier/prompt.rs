//! Prompt construction for shipment classification.

use crate::extractor::Candidate;
use crate::rules::CustomerProfile;
use crate::shipment::RefSubtype;

pub(crate) fn system_prompt() -> String {
    let subtypes: Vec<&str> = RefSubtype::ALL.iter().map(|s| s.as_str()).collect();
    format!(
        r#"You are a freight tender classifier. You receive the text of a load tender and a list of candidate values found in it by pattern matching. Assemble them into one shipment.

RULES:
- Only use values that appear in the tender text. Never invent reference numbers, addresses, dates or weights.
- Prefer candidate values; they are already normalized (dates YYYY-MM-DD, times HH:MM).
- Reference numbers that belong to one stop (pickup numbers, appointment numbers) go on that stop.
- Reference number types must be one of: {types}.
- Stops are listed in the order they occur. Use null for anything the tender does not say.
- Put text you could not place in unclassified_notes.

Respond with JSON only, exactly this shape:
{{
  "reference_numbers": [{{"type": "po", "value": "123456"}}],
  "stops": [
    {{"type": "pickup", "sequence": 1,
      "location": {{"name": null, "address": null, "city": null, "state": null, "zip": null, "country": null}},
      "schedule": {{"date": null, "time": null, "appointment_required": null}},
      "reference_numbers": [], "notes": null}}
  ],
  "cargo": {{
    "weight": {{"value": 0, "unit": "lbs"}},
    "pieces": {{"count": 0, "type": null}},
    "dimensions": null, "commodity": null,
    "temperature": {{"value": null, "unit": "F", "mode": null}}
  }},
  "unclassified_notes": [],
  "confidence_notes": null
}}"#,
        types = subtypes.join(", ")
    )
}

pub(crate) fn user_prompt(
    text: &str,
    candidates: &[Candidate],
    profile: Option<&CustomerProfile>,
    max_candidates: usize,
) -> String {
    let mut prompt = String::new();

    if let Some(profile) = profile {
        prompt.push_str(&format!("CUSTOMER: {}\n", profile.name));
        if let Some(notes) = &profile.prompt_notes {
            prompt.push_str(&format!("Customer notes: {}\n", notes));
        }
        let rules: Vec<String> = profile.active_rules().map(|r| r.describe()).collect();
        if !rules.is_empty() {
            prompt.push_str("Known customer conventions:\n");
            for rule in rules {
                prompt.push_str(&format!("- {}\n", rule));
            }
        }
        for (category, commodity) in &profile.cargo_hints.commodity_by_temp {
            prompt.push_str(&format!(
                "- {} loads are usually: {}\n",
                category.as_str(),
                commodity
            ));
        }
        prompt.push('\n');
    }

    prompt.push_str("TENDER TEXT:\n");
    prompt.push_str(text);
    prompt.push_str("\n\nCANDIDATES:\n");

    for (i, c) in candidates.iter().take(max_candidates).enumerate() {
        prompt.push_str(&format!("[{}] {} = {}", i, c.candidate_type.as_str(), c.value));
        if let Some(subtype) = c.subtype {
            prompt.push_str(&format!(" (subtype: {})", subtype.as_str()));
        }
        if let Some(label) = &c.label_hint {
            prompt.push_str(&format!(" (label: {})", label));
        }
        prompt.push_str(&format!(" [block: {}]\n", c.block_type.as_str()));
    }
    if candidates.len() > max_candidates {
        prompt.push_str(&format!(
            "... and {} more candidates\n",
            candidates.len() - max_candidates
        ));
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{extract_candidates, ExtractOptions};
    use chrono::Utc;

    #[test]
    fn test_system_prompt_lists_subtypes() {
        let p = system_prompt();
        assert!(p.contains("po, bol, pro"));
        assert!(p.contains("\"reference_numbers\""));
    }

    #[test]
    fn test_user_prompt_includes_candidates_and_profile() {
        let text = "PO# 118585 ship to Chicago, IL 60601";
        let candidates = extract_candidates(text, &ExtractOptions::default()).candidates;
        let mut profile = CustomerProfile::new("c1", "Acme Foods", Utc::now());
        profile.prompt_notes = Some("Always dry van".to_string());

        let p = user_prompt(text, &candidates, Some(&profile), 10);
        assert!(p.contains("CUSTOMER: Acme Foods"));
        assert!(p.contains("Always dry van"));
        assert!(p.contains("reference_number = 118585 (subtype: po)"));
        assert!(p.contains("city_state_zip = Chicago, IL 60601"));
    }

    #[test]
    fn test_user_prompt_truncates_candidates() {
        let text = "111111 222222 333333";
        let candidates = extract_candidates(text, &ExtractOptions::default()).candidates;
        let p = user_prompt(text, &candidates, None, 1);
        assert!(p.contains("[0]"));
        assert!(!p.contains("[1]"));
        assert!(p.contains("and 2 more candidates"));
    }
}
