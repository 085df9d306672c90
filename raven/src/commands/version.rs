//! `raven version`: build info (§6).

pub fn run(json: bool) -> i32 {
    let name = env!("CARGO_PKG_NAME");
    let version = env!("CARGO_PKG_VERSION");
    if json {
        println!(
            "{}",
            serde_json::json!({
                "name": name,
                "version": version,
            })
        );
    } else {
        println!("{name} {version}");
    }
    super::EXIT_OK
}
