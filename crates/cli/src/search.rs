use stockroom_api::{Catalog, SearchQuery};
use tabled::Table;

use crate::Session;
use crate::view::AssetRow;

pub fn run(session: &Session, label: Option<String>, tags: Vec<String>) -> Result<(), Box<dyn std::error::Error>> {
    let results = session.catalog.search(&SearchQuery { label, tags })?;
    if results.is_empty() {
        println!("No assets found.");
        return Ok(());
    }
    println!("{}", Table::new(results.iter().map(AssetRow::from_asset)));
    println!("{} assets", results.len());
    Ok(())
}
