fn main() -> anyhow::Result<()> {
    statewire::cli::run()
}
