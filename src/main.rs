fn main() {
    if let Err(err) = sheetwarp::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
