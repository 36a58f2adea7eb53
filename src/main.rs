fn main() {
    // Load .env file if present (for development convenience)
    // Silently ignore if not found - production uses system env vars
    let _ = dotenvy::dotenv();

    if let Err(e) = portal_lib::run() {
        log::error!("{}", e);
        eprintln!("org-portal: {}", e);
        std::process::exit(1);
    }
}
