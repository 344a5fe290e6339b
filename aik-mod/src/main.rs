use std::path::Path;
use std::process;
use std::time::Instant;

use aik_mod::builder::{self, BuildOptions, BuildReport};
use aik_mod::cli::{Mode, Options};
use aik_mod::format::ModuleHeader;
use aik_mod::logger;
use aik_mod::result::error::{error_style, success_style, white_style};
use aik_mod::verify::ModuleImage;

fn fail<E: std::fmt::Display>(error: E) -> ! {
    println!("{}: {}", error_style().apply_to("error"), white_style().apply_to(error));
    process::exit(1);
}

/// A right-aligned green verb followed by its subject, as in `    Building `app.aikm``.
fn status<D: std::fmt::Display>(verb: &str, subject: D) -> String {
    let indent = " ".repeat(12usize.saturating_sub(verb.len()));
    format!("{}{} {}", indent, success_style().apply_to(verb), subject)
}

fn print_header(header: &ModuleHeader) {
    println!("    {:<18} {:#010x}", "entry offset", header.entry_offset);
    println!("    {:<18} {}", "payload length", header.payload_length);
    println!("    {:<18} {:#010x} ({} entries)", "relocations", header.relocation_offset, header.relocation_count);
    println!("    {:<18} {:#010x} ({} entries)", "symbols", header.symbol_offset, header.symbol_count);
    println!("    {:<18} {:#010x} ({} bytes)", "bss", header.bss_start, header.bss_length);
    println!("    {:<18} {:#010x}", "entry point", header.entry_point);
    println!("    {:<18} {}", "total size", header.total_size);
    println!("    {:<18} {:#010x}", "crc32", header.crc32);
}

fn check(module: &Path) {
    println!("{}", status("Checking", format!("`{}`", module.display())));
    let bytes = std::fs::read(module).unwrap_or_else(|e| fail(format!("`{}`: {}", module.display(), e)));
    let image = ModuleImage::parse(&bytes).unwrap_or_else(|e| fail(e));

    if !image.description().is_empty() {
        println!("    {:<18} {}", "description", image.description());
    }
    print_header(image.header());
}

fn build(options: BuildOptions, verify: bool) -> BuildReport {
    println!("{}", status("Building", format!("`{}`", options.output.display())));
    let report = builder::build_module(&options).unwrap_or_else(|e| fail(e));

    if verify {
        let bytes = std::fs::read(&report.summary.path).unwrap_or_else(|e| fail(e));
        if let Err(e) = ModuleImage::parse(&bytes) {
            fail(format!("verification of `{}` failed: {}", report.summary.path.display(), e));
        }
        println!("{}", status("Verified", format!("`{}`", report.summary.path.display())));
    }
    report
}

fn main() {
    let options = Options::from_command_line();
    if let Err(e) = logger::init(options.verbose) {
        eprintln!("cannot install logger: {}", e);
    }

    let start = Instant::now();
    match options.into_mode() {
        Mode::Check { module } => check(&module),
        Mode::Build { options, verify } => {
            let report = build(options, verify);
            print!("{:#}", report.log);

            let duration = Instant::now() - start;
            println!("{} ({} bytes, {} symbol(s), {} relocation(s)) in {}.{:02}s",
                     status("Finished", report.summary.path.display()),
                     report.summary.header.total_size,
                     report.summary.header.symbol_count,
                     report.summary.header.relocation_count,
                     duration.as_secs(),
                     (duration.as_millis() / 10) % 100);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_line() {
        console::set_colors_enabled(false);
        assert_eq!(status("Building", "`app.aikm`"), "    Building `app.aikm`");
        assert_eq!(status("Finished", 42), "    Finished 42");
    }
}
