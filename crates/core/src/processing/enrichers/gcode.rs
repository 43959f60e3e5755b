use serde_json::{Number, Value};
use stockroom_api::{Asset, Properties};

use crate::error::Result;
use crate::processing::renderers::gcode::{comment_body, is_block_end, is_block_start};
use crate::processing::{Enricher, ProcessContext};

/// Comment line written by SuperSlicer ahead of its embedded config.
const SUPERSLICER_MARKER: &str = "SuperSlicer_config";

/// Slicer settings found in `; key = value` comments.
///
/// Values are typed as integer, then float, then string. Thumbnail payloads
/// are ignored.
pub fn parse_properties(text: &str) -> Properties {
    let mut properties = Properties::new();
    let mut in_thumbnail = false;

    for line in text.lines() {
        let Some(body) = comment_body(line) else {
            continue;
        };
        if in_thumbnail {
            in_thumbnail = !is_block_end(body);
            continue;
        }
        if is_block_start(body) {
            in_thumbnail = true;
            continue;
        }
        if body.starts_with(SUPERSLICER_MARKER) {
            properties.insert("slicer".to_string(), Value::String("SuperSlicer".to_string()));
            continue;
        }

        let parts: Vec<&str> = body.split(" = ").collect();
        if parts.len() != 2 {
            continue;
        }
        let key = parts[0].trim();
        if key.is_empty() {
            continue;
        }
        properties.insert(key.to_string(), typed_value(parts[1].trim()));
    }
    properties
}

fn typed_value(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Some(n) = raw.parse::<f64>().ok().and_then(Number::from_f64) {
        return Value::Number(n);
    }
    Value::String(raw.to_string())
}

pub struct GCodeEnricher;

impl Enricher for GCodeEnricher {
    fn name(&self) -> &'static str {
        "gcode"
    }

    fn enrich(&self, ctx: &ProcessContext, asset: &mut Asset) -> Result<Vec<Asset>> {
        let bytes = ctx.source_bytes(asset)?;
        let parsed = parse_properties(&String::from_utf8_lossy(&bytes));
        tracing::debug!("parsed {} slicer properties from {}", parsed.len(), asset.path_str());
        asset.properties.extend(parsed);
        Ok(Vec::new())
    }
}
