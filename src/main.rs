fn main() -> Result<(), anyhow::Error> {
    scan_tree::run()
}
