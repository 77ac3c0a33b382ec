use serde_json::{json, Map, Value};

use crate::cli::OutputFormat;

/// Print a success line, or a JSON object merging `data` into the envelope.
pub fn output_success(output_format: &OutputFormat, message: &str, data: Option<Value>) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let mut response = Map::new();
            response.insert("success".to_string(), json!(true));
            response.insert("message".to_string(), json!(message));
            if let Some(Value::Object(extra)) = data {
                response.extend(extra);
            }
            println!("{}", serde_json::to_string_pretty(&Value::Object(response))?);
        }
        OutputFormat::Text => {
            println!("✓ {}", message);
        }
    }
    Ok(())
}

/// Print a list of plain strings under `collection_name`.
pub fn output_list(
    output_format: &OutputFormat,
    collection_name: &str,
    items: &[String],
    empty_message: &str,
) -> anyhow::Result<()> {
    match output_format {
        OutputFormat::Json => {
            let mut body = Map::new();
            body.insert(collection_name.to_string(), json!(items));
            println!("{}", serde_json::to_string_pretty(&Value::Object(body))?);
        }
        OutputFormat::Text if items.is_empty() => println!("{}", empty_message),
        OutputFormat::Text => {
            for item in items {
                println!("{}", item);
            }
        }
    }
    Ok(())
}
