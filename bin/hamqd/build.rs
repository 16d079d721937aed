//! ---
//! hamq_section: "01-core-functionality"
//! hamq_subsection: "binary"
//! hamq_type: "source"
//! hamq_scope: "code"
//! hamq_description: "Build script embedding cargo and git metadata for the HAMQ daemon."
//! hamq_version: "v0.1.0"
//! hamq_owner: "tbd"
//! ---
use vergen::EmitBuilder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Outside a git checkout vergen emits placeholder values instead of failing.
    EmitBuilder::builder().all_cargo().all_git().emit()?;
    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
