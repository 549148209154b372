fn main() -> anyhow::Result<()> {
    // Host builds run the simulated panel and never see ESP-IDF
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("espidf") {
        return Ok(());
    }

    // Necessary for ESP-IDF
    embuild::espidf::sysenv::output();

    // Add crash log helper for better panic diagnostics
    println!("cargo:rustc-link-arg=-Wl,--undefined=esp_backtrace_print_app_description");

    println!("cargo:rerun-if-changed=sdkconfig.defaults");

    Ok(())
}
