// This is a library crate. To run the report/serve server, use:
//
//   cargo run --bin vailix-server

fn main() {
    eprintln!("This is a library crate. To run the server, use:");
    eprintln!("  cargo run --bin vailix-server");
    std::process::exit(1);
}
