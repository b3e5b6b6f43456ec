//! Command-line driver for the GCN assembler.

use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use gcn_asm::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "gcnasm", about = "Assembler for the AMD GCN instruction set families")]
struct Cli {
    /// Input assembly files; stdin when empty.
    inputs: Vec<PathBuf>,

    /// Output binary format.
    #[arg(short = 'f', long = "format", default_value = "rawcode")]
    format: BinaryFormat,

    /// Target GPU device.
    #[arg(short = 'd', long = "device", default_value = "CapeVerde")]
    device: GpuDevice,

    /// 64-bit address mode.
    #[arg(long = "64bit")]
    bits64: bool,

    /// Suppress warnings.
    #[arg(short = 'w')]
    no_warnings: bool,

    /// Start in alternate-macro mode.
    #[arg(long = "alternate-macro")]
    alternate_macro: bool,

    /// Reproduce the historical broken float-literal parsing.
    #[arg(long = "buggy-fp-lit")]
    buggy_fp_lit: bool,

    /// Match macro names case-insensitively.
    #[arg(long = "macro-case")]
    macro_no_case: bool,

    /// Accept the old modifier-parameter syntax.
    #[arg(long = "old-mod-param")]
    old_mod_param: bool,

    /// Assemble without writing output.
    #[arg(long = "test-run")]
    test_run: bool,

    /// Force the deferred expression-resolution path.
    #[arg(long = "test-resolve")]
    test_resolve: bool,

    /// Include search directory (repeatable).
    #[arg(short = 'I', long = "include-dir")]
    include_dirs: Vec<PathBuf>,

    /// Define a symbol: name or name=value (repeatable).
    #[arg(short = 'D', long = "defsym")]
    def_syms: Vec<String>,

    /// Output file.
    #[arg(short = 'o', long = "output", default_value = "a.out")]
    output: PathBuf,
}

fn parse_def_sym(text: &str) -> Result<(String, u64), String> {
    match text.split_once('=') {
        Some((name, value)) => {
            let value = if let Some(hex) = value.strip_prefix("0x") {
                i64::from_str_radix(hex, 16)
            } else {
                value.parse::<i64>()
            }
            .map_err(|e| format!("invalid value for symbol '{}': {}", name, e))?;
            Ok((name.to_owned(), value as u64))
        }
        None => Ok((text.to_owned(), 0)),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let mut def_syms = Vec::new();
    for d in &cli.def_syms {
        match parse_def_sym(d) {
            Ok(pair) => def_syms.push(pair),
            Err(e) => {
                eprintln!("gcnasm: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }
    let config = AsmConfig {
        format: cli.format,
        device: cli.device,
        bits64: cli.bits64,
        warnings: !cli.no_warnings,
        alternate_macro: cli.alternate_macro,
        buggy_fp_lit: cli.buggy_fp_lit,
        macro_no_case: cli.macro_no_case,
        old_mod_param: cli.old_mod_param,
        test_run: cli.test_run,
        test_resolve: cli.test_resolve,
        include_dirs: cli.include_dirs,
        def_syms,
    };
    let mut assembler = if cli.inputs.is_empty() {
        let mut text = String::new();
        if let Err(e) = std::io::Read::read_to_string(&mut std::io::stdin(), &mut text) {
            eprintln!("gcnasm: can't read stdin: {}", e);
            return ExitCode::FAILURE;
        }
        Assembler::from_string("", text, config)
    } else {
        match Assembler::from_files(cli.inputs, config) {
            Ok(a) => a,
            Err(e) => {
                eprintln!("gcnasm: {}", e);
                return ExitCode::FAILURE;
            }
        }
    };
    let good = match assembler.assemble() {
        Ok(good) => good,
        Err(e) => {
            for message in &assembler.messages {
                eprintln!("{}", message);
            }
            eprintln!("gcnasm: {}", e);
            return ExitCode::FAILURE;
        }
    };
    for message in &assembler.messages {
        eprintln!("{}", message);
    }
    if !good {
        return ExitCode::FAILURE;
    }
    if cli.test_run {
        let size = assembler.write_binary().map(|b| b.len()).unwrap_or(0);
        eprintln!("gcnasm: test run finished, {} bytes of output", size);
        return ExitCode::SUCCESS;
    }
    match assembler.write_binary() {
        Ok(binary) => match std::fs::File::create(&cli.output).and_then(|mut f| f.write_all(&binary)) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("gcnasm: can't write output '{}': {}", cli.output.display(), e);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            eprintln!("gcnasm: {}", e);
            ExitCode::FAILURE
        }
    }
}
