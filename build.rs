// build.rs

fn main() -> anyhow::Result<()> {
    build_data::no_debug_rebuilds().map_err(anyhow::Error::msg)?;

    // outside a git checkout without SOURCE_DATE_EPOCH, stamp the build time
    if let Err(e) = build_data::set_SOURCE_TIMESTAMP() {
        println!("cargo:warning=source timestamp unavailable ({e}), using build time");
        let stamp = build_data::format_timestamp(build_data::now()).map_err(anyhow::Error::msg)?;
        println!("cargo:rustc-env=SOURCE_TIMESTAMP={stamp}");
    }

    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }
    Ok(())
}
// EOF
