fn main() {
    if let Err(err) = screen_canvas::run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
