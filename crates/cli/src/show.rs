use stockroom_api::Catalog;
use tabled::Table;

use crate::Session;
use crate::view::AssetRow;

pub fn run(session: &Session, id: &str, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let asset = session.resolve(id)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&asset)?);
        return Ok(());
    }

    println!("Id:        {}", asset.id);
    println!("Label:     {}", asset.label);
    println!("Node:      {}", asset.node_kind);
    println!("Kind:      {}", asset.kind.map(|k| k.to_string()).unwrap_or_else(|| "-".into()));
    println!("Backend:   {} ({})", asset.backend_name, asset.backend_kind);
    println!("Path:      {}", asset.path_str());
    if let Some(parent) = &asset.parent_id {
        println!("Parent:    {}", parent);
    }
    if let Some(thumb) = &asset.thumbnail {
        println!("Thumbnail: {}", thumb);
    }
    if !asset.tags.is_empty() {
        println!("Tags:      {}", asset.tags.join(", "));
    }
    if !asset.properties.is_empty() {
        println!("\nProperties:");
        for (k, v) in &asset.properties {
            println!("  {} = {}", k, v);
        }
    }

    let children = session.catalog.children(&asset.id)?;
    if !children.is_empty() {
        println!("\nChildren:");
        println!("{}", Table::new(children.iter().map(AssetRow::from_asset)));
    }
    Ok(())
}
