use square_core::storage::MemoryStorage;
use square_core::Square;
use std::path::PathBuf;

fn main() {
    let manifest = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("square.json"));

    let storage = MemoryStorage::new();
    let mut square = Square::new().with_storage(storage.clone());

    if let Err(e) = square.parse(manifest.as_path()) {
        eprintln!("{}", e.report());
        std::process::exit(1);
    }

    match square.build(None, None) {
        Ok(report) => {
            for (output, collection) in report.outputs.iter().zip(storage.collections()) {
                println!(
                    "{} {} -> {} ({} bytes)",
                    output.distribution,
                    output.extension,
                    output.location.display(),
                    output.bytes
                );
                println!("{}\n", collection.content);
            }
        }
        Err(e) => {
            eprintln!("{e:?}");
            std::process::exit(1);
        }
    }
}
