fn main() {
    // Exposes package and toolchain versions to the export manifest
    built::write_built_file().expect("Failed to generate build info");
}
