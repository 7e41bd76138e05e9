use bcinfo::{ExtractorConfig, MetadataExtractor};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let path = args.next().expect("Provide file path to a .bc file");
    let legacy_root = args.any(|arg| arg == "--legacy-root");
    let file = std::fs::read(&path).unwrap();

    let mut extractor = MetadataExtractor::from_bitcode(file).with_config(ExtractorConfig {
        legacy_root_kernel: legacy_root,
        ..ExtractorConfig::default()
    });
    if let Err(err) = extractor.extract() {
        eprintln!("{path}: {err}");
        std::process::exit(1);
    }

    println!("compilerVersion: {}", extractor.compiler_version());
    println!("optimizationLevel: {}", extractor.optimization_level());
    println!("floatPrecision: {:?}", extractor.float_precision());
    println!("isThreadable: {}", extractor.is_threadable());
    if let Some(checksum) = extractor.build_checksum() {
        println!("buildChecksum: {checksum}");
    }
    println!("hasDebugInfo: {}", extractor.has_debug_info());

    println!("exportVarCount: {}", extractor.export_var_count());
    for name in extractor.export_var_names() {
        println!("  var: {name}");
    }
    println!("exportFuncCount: {}", extractor.export_func_count());
    for name in extractor.export_func_names() {
        println!("  func: {name}");
    }
    println!(
        "exportForEachSignatureCount: {}",
        extractor.export_for_each_signature_count()
    );
    for kernel in extractor.export_for_each() {
        println!("  forEach: {} - {}", kernel.name, kernel.signature);
    }
    println!("pragmaCount: {}", extractor.pragma_count());
    for pragma in extractor.pragmas() {
        println!("  pragma: {} - {}", pragma.key, pragma.value);
    }
    println!("objectSlotCount: {}", extractor.object_slot_count());
    for slot in extractor.object_slots() {
        println!("  objectSlot: {slot}");
    }
}
