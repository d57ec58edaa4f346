use qkd_postproc_core::SessionConfig;

pub fn run(output: &str) {
    if std::path::Path::new(output).exists() {
        eprintln!("Refusing to overwrite existing {output}");
        std::process::exit(1);
    }
    match SessionConfig::default().save(output) {
        Ok(()) => println!("Default session config written to {output}"),
        Err(e) => {
            eprintln!("Failed to write {output}: {e}");
            std::process::exit(1);
        }
    }
}
