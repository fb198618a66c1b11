fn main() {
    if let Err(e) = colloquy::run() {
        eprintln!("colloquy: {:#}", e);
        std::process::exit(1);
    }
}
