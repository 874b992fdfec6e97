//! Browser / OS / device classification using woothee

use woothee::parser::Parser;

use crate::analytics::models::{ClientInfo, UNKNOWN};

/// Classify a User-Agent header; anything unrecognised becomes `Unknown`
pub fn classify(user_agent: Option<&str>) -> ClientInfo {
    let ua = match user_agent.map(str::trim) {
        Some(s) if !s.is_empty() => s,
        _ => return ClientInfo::default(),
    };

    let parser = Parser::new();
    match parser.parse(ua) {
        Some(result) => ClientInfo {
            device: device_label(&result.category).to_string(),
            browser: known_or_unknown(&result.name),
            operating_system: known_or_unknown(&result.os),
        },
        None => ClientInfo::default(),
    }
}

fn known_or_unknown(value: &str) -> String {
    if value.is_empty() || value.eq_ignore_ascii_case("UNKNOWN") {
        UNKNOWN.to_string()
    } else {
        value.to_string()
    }
}

fn device_label(category: &str) -> &'static str {
    match category {
        "pc" => "Desktop",
        "smartphone" | "mobilephone" => "Mobile",
        "crawler" => "Bot",
        "appliance" => "Other",
        _ => UNKNOWN,
    }
}
