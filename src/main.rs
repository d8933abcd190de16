fn main() -> route_perf::error::Result<()> {
    route_perf::main()
}
