//! Rendering typed values back into argument-string syntax.

use serde_json::Value;

use crate::Arguments;

/// Render one `key=value` item. Strings are always quoted so they survive
/// a parse even when they look like numbers or booleans.
pub fn render_item(key: &str, value: &Value) -> String {
    let mut out = String::with_capacity(key.len() + 8);
    out.push_str(key);
    out.push('=');
    render_value(value, &mut out);
    out
}

/// Render a whole map as a comma-separated argument string.
pub fn render_arguments(arguments: &Arguments) -> String {
    arguments
        .iter()
        .map(|(key, value)| render_item(key, value))
        .collect::<Vec<_>>()
        .join(",")
}

fn render_value(value: &Value, out: &mut String) {
    match value {
        Value::String(s) => render_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                render_value(item, out);
            }
            out.push(']');
        }
        // Objects have no argument syntax; pass them as their JSON text.
        Value::Object(_) => render_string(&value.to_string(), out),
        Value::Null | Value::Bool(_) | Value::Number(_) => out.push_str(&value.to_string()),
    }
}

fn render_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn renders_items_like_the_client_protocol() {
        assert_eq!(render_item("title", &json!("scan 3")), r#"title="scan 3""#);
        assert_eq!(render_item("n", &json!(42)), "n=42");
        assert_eq!(render_item("on", &json!(true)), "on=true");
        assert_eq!(render_item("x", &json!(null)), "x=null");
        assert_eq!(render_item("dims", &json!([1, "a"])), r#"dims=[1, "a"]"#);
    }

    #[test]
    fn rendered_arguments_parse_back() {
        let mut args = Arguments::new();
        args.insert("path".into(), json!("C:\\data\\\"quoted\"\n"));
        args.insert("count".into(), json!(3));
        args.insert("looks_numeric".into(), json!("12"));
        args.insert("dims".into(), json!([1.5, [true, null]]));

        let rendered = render_arguments(&args);
        assert_eq!(crate::parse(&rendered).unwrap(), args);
    }
}
