fn main() {
    if let Err(e) = autograder::cli::run_cli() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
