use std::io::{self, Read, Write};
use std::path::PathBuf;

use crate::Session;

pub fn run(
    session: &Session,
    id: &str,
    path: Option<String>,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let asset = session.resolve(id)?;
    let bytes = match path {
        Some(rel) => {
            let (mut handle, stat) = session.library.open(&asset, &rel)?;
            let mut buf = Vec::with_capacity(stat.size as usize);
            handle.read_to_end(&mut buf)?;
            buf
        }
        None => session.library.read_asset(&asset)?,
    };

    match output {
        Some(file) => {
            std::fs::write(&file, &bytes)?;
            eprintln!("wrote {} bytes to {}", bytes.len(), file.display());
        }
        None => io::stdout().lock().write_all(&bytes)?,
    }
    Ok(())
}
