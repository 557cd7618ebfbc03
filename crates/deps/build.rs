//! Generates the `pub use` facade for every dependency listed in this crate's manifest.

use std::{env, fs, io::Write, path::Path};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR")?;
    let manifest_path = Path::new(&manifest_dir).join("Cargo.toml");
    println!("cargo:rerun-if-changed={}", manifest_path.display());

    let manifest: toml::Value = toml::from_str(&fs::read_to_string(&manifest_path)?)?;
    let deps = manifest
        .get("dependencies")
        .and_then(toml::Value::as_table)
        .ok_or("deps manifest has no [dependencies] table")?;

    let out_path = Path::new(&env::var("OUT_DIR")?).join("deps.rs");
    let mut out = fs::File::create(out_path)?;
    for name in deps.keys() {
        writeln!(out, "pub use {};", name.replace('-', "_"))?;
    }
    Ok(())
}
