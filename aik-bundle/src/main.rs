use std::process;
use std::time::Instant;

use console::{style, Emoji};

use aik_bundle::cli::utils::Bar;
use aik_bundle::cli::{Mode, Options};
use aik_bundle::packer::BundlePacker;
use aik_mod::logger;

fn main() {
    let options = Options::from_command_line();
    if let Err(e) = logger::init(options.verbose) {
        eprintln!("cannot install logger: {}", e);
    }
    let Mode { modules, output, verify } = options.into_mode();

    let start = Instant::now();
    println!("{} {} {} module(s) into `{}`", Emoji("ℹ️", "ℹ"), style("Packing:").bright().cyan(), modules.len(), output.display());

    let bar = Bar::new("Writing bundle...", modules.len() as u64);
    let result = BundlePacker::new()
        .verify(verify)
        .pack_with(&modules, &output, |done, total| bar.progress(done as u64, total as u64));

    match result {
        Err(e) => {
            bar.abandon();
            println!("{} {} {}", Emoji("❌", "X"), style("Error:").bright().red(), e);
            process::exit(1);
        },
        Ok(summary) => {
            bar.finish();
            for (index, module) in summary.modules.iter().enumerate() {
                println!("   Module {}: {:#010x}  {}", index, module.offset, module.path.display());
            }

            let duration = Instant::now() - start;
            println!("{} {} `{}` ({} bytes) in {}.{:02}s",
                     Emoji("✔️", "✔"),
                     style("Success:").bright().green(),
                     summary.path.display(),
                     summary.total_size,
                     duration.as_secs(),
                     (duration.as_millis() / 10) % 100);
        }
    }
}
