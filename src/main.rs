use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    colloquy::cli::main()
}
