use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::ImageFormat;
use stockroom_api::Asset;

use crate::error::{Result, StockroomError};
use crate::processing::{ProcessContext, Renderer, render_name};

/// A preview image embedded in slicer output as a base64 comment block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedThumbnail {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl EmbeddedThumbnail {
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Strip the comment marker and surrounding spaces. `None` for non-comments.
pub(crate) fn comment_body(line: &str) -> Option<&str> {
    if !line.trim_start().starts_with(';') {
        return None;
    }
    Some(line.trim_matches(|c| c == ' ' || c == ';' || c == '\r'))
}

struct BlockHeader {
    width: u32,
    height: u32,
    length: usize,
}

fn is_block_tag(tag: &str) -> bool {
    matches!(tag, "thumbnail" | "thumbnail_PNG" | "thumbnail_JPG")
}

pub(crate) fn is_block_start(body: &str) -> bool {
    let mut tokens = body.split_whitespace();
    matches!((tokens.next(), tokens.next()), (Some(tag), Some("begin")) if is_block_tag(tag))
}

pub(crate) fn is_block_end(body: &str) -> bool {
    let mut tokens = body.split_whitespace();
    matches!((tokens.next(), tokens.next()), (Some(tag), Some("end")) if is_block_tag(tag))
}

fn parse_header(body: &str) -> Option<BlockHeader> {
    let tokens: Vec<&str> = body.split_whitespace().collect();
    if tokens.len() < 4 {
        return None;
    }
    let (w, h) = tokens[2].split_once('x')?;
    Some(BlockHeader {
        width: w.parse().ok()?,
        height: h.parse().ok()?,
        length: tokens[3].parse().ok()?,
    })
}

/// Every well-formed thumbnail block in `text`.
///
/// A block whose payload length differs from the declared length, or whose
/// payload is not valid base64, is skipped.
pub fn extract_thumbnails(text: &str) -> Vec<EmbeddedThumbnail> {
    let mut found = Vec::new();
    let mut lines = text.lines();

    while let Some(line) = lines.next() {
        let Some(body) = comment_body(line) else {
            continue;
        };
        if !is_block_start(body) {
            continue;
        }
        let header = parse_header(body);

        let mut payload = String::new();
        for inner in lines.by_ref() {
            let inner = inner.trim_matches(|c| c == ' ' || c == ';' || c == '\r');
            if is_block_end(inner) {
                break;
            }
            payload.push_str(inner);
        }

        let Some(header) = header else {
            tracing::debug!("skipping thumbnail block with malformed header: {}", body);
            continue;
        };
        if payload.len() != header.length {
            tracing::debug!(
                "skipping thumbnail block: declared {} bytes, found {}",
                header.length,
                payload.len()
            );
            continue;
        }
        match STANDARD.decode(payload.as_bytes()) {
            Ok(data) => found.push(EmbeddedThumbnail {
                width: header.width,
                height: header.height,
                data,
            }),
            Err(e) => tracing::debug!("skipping thumbnail block: {}", e),
        }
    }
    found
}

/// The thumbnail with the largest declared area.
pub fn largest_thumbnail(text: &str) -> Option<EmbeddedThumbnail> {
    extract_thumbnails(text).into_iter().max_by_key(|t| t.area())
}

/// Re-encodes the largest embedded slicer thumbnail as PNG.
pub struct GCodeRenderer;

impl Renderer for GCodeRenderer {
    fn name(&self) -> &'static str {
        "gcode"
    }

    fn render(&self, ctx: &ProcessContext, asset: &Asset) -> Result<Asset> {
        let generated = ctx.generated()?;
        let name = render_name(asset);
        if generated.exists(&name) {
            return Ok(ctx.generated_asset(generated.as_ref(), &name, &asset.label, asset));
        }

        tracing::info!("rendering {} from embedded thumbnail", asset.path_str());
        let bytes = ctx.source_bytes(asset)?;
        let text = String::from_utf8_lossy(&bytes);
        let thumbnail = largest_thumbnail(&text)
            .ok_or_else(|| StockroomError::Decode(format!("no thumbnail found in {}", asset.path_str())))?;

        let image = image::load_from_memory(&thumbnail.data)
            .map_err(|e| StockroomError::Decode(format!("embedded thumbnail: {}", e)))?;
        let mut png = Vec::new();
        image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

        ctx.store_generated(&name, &png, &asset.label, asset)
    }
}
