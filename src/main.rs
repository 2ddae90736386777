fn main() {
    if let Err(err) = energy_import::run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
