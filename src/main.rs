fn main() {
    qapilot_bulk_lib::run()
}
