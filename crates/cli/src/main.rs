fn main() {
    if let Err(e) = stockroom_cli::run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
