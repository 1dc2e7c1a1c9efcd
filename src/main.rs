fn main() -> std::process::ExitCode {
    tenant_keepalive_lib::main_entry()
}
