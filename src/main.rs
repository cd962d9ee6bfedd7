fn main() {
    if let Err(err) = cml_reconcile::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
