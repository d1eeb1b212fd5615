fn main() {
    generate_version_info();
}

/// Generate version information from git tags using vergen.
///
/// Generated constants are accessed via `env!("VERGEN_GIT_DESCRIBE")` /
/// `env!("VERGEN_GIT_SHA")` and surfaced in the `--version` output and the
/// startup log line.
fn generate_version_info() {
    use vergen_git2::{BuildBuilder, CargoBuilder, Emitter, Git2Builder};

    let build = BuildBuilder::default()
        .build_timestamp(true)
        .build()
        .expect("Failed to configure build info");

    let cargo = CargoBuilder::default()
        .target_triple(true)
        .build()
        .expect("Failed to configure cargo info");

    let git2 = Git2Builder::default()
        .describe(true, true, None)
        .sha(true)
        .build()
        .expect("Failed to configure git info");

    Emitter::default()
        .add_instructions(&build)
        .expect("Failed to add build instructions")
        .add_instructions(&cargo)
        .expect("Failed to add cargo instructions")
        .add_instructions(&git2)
        .expect("Failed to add git instructions")
        .emit()
        .expect("Failed to emit version info");
}
