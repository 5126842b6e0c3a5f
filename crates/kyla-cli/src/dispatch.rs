use std::io::Write;

use anyhow::Result;
use kyla_core::{
    build_repository, Action, Descriptor, DesiredState, Installer, LogLevel, ProgressUpdate,
    ValidationKind, ValidationRecord, ValidationSummary,
};

use crate::cli::{
    BuildArgs, Command, KylaCli, QueryFilesetsArgs, RepairArgs, SelectionArgs, ValidateArgs,
};

pub const EXIT_OK: i32 = 0;
pub const EXIT_VALIDATION_FAULTS: i32 = 1;
pub const EXIT_RUNTIME: i32 = 3;

pub fn run(cli: KylaCli) -> Result<i32> {
    let mut installer = Installer::new();
    if cli.log {
        installer.set_log_callback(stderr_log);
    }
    if cli.progress {
        installer.set_progress_callback(stderr_progress);
    }

    match cli.command {
        Command::Build(args) => build(args, cli.progress),
        Command::Validate(args) => validate(installer, args),
        Command::Repair(args) => repair(installer, args),
        Command::QueryFilesets(args) => query_filesets(installer, args),
        Command::Install(args) => install(installer, args),
        Command::Configure(args) => configure(installer, args),
    }
}

fn stderr_log(source: &str, level: LogLevel, message: &str) {
    eprintln!("{:<8} {source}: {message}", level.as_str());
}

fn stderr_progress(update: &ProgressUpdate<'_>) {
    eprint!("{:6.2} % : {:<24}\r", update.fraction() * 100.0, update.action);
    if update.total > 0 && update.current == update.total {
        eprintln!();
    }
    let _ = std::io::stderr().flush();
}

fn build(args: BuildArgs, progress: bool) -> Result<i32> {
    let descriptor = Descriptor::load(&args.descriptor)?;
    let mut report: Box<dyn FnMut(&ProgressUpdate<'_>)> = if progress {
        Box::new(stderr_progress)
    } else {
        Box::new(|_: &ProgressUpdate<'_>| {})
    };
    build_repository(
        &descriptor,
        &args.source_directory,
        &args.output_directory,
        &mut report,
    )?;
    Ok(EXIT_OK)
}

fn validate(mut installer: Installer<'_>, args: ValidateArgs) -> Result<i32> {
    if args.verbose {
        installer.set_validation_callback(|record: &ValidationRecord<'_>| {
            let label = match record.kind {
                ValidationKind::Ok => "OK",
                ValidationKind::Missing => "MISSING",
                ValidationKind::Corrupted => "CORRUPTED",
            };
            println!("{label:<9} {}", record.path.display());
        });
    }
    let mut target = installer.open_target_repository(&args.repository)?;
    let summary = installer.execute(Action::Verify, &mut target, None, None)?;
    if args.summary {
        print_summary(&summary);
    }
    Ok(exit_for(&summary))
}

fn repair(mut installer: Installer<'_>, args: RepairArgs) -> Result<i32> {
    let mut source = installer.open_source_repository(&args.source)?;
    let mut target = installer.open_target_repository(&args.target)?;
    let summary = installer.execute(Action::Repair, &mut target, Some(&mut source), None)?;
    print_summary(&summary);
    Ok(exit_for(&summary))
}

fn query_filesets(installer: Installer<'_>, args: QueryFilesetsArgs) -> Result<i32> {
    let source = installer.open_source_repository(&args.repository)?;
    for info in installer.query_filesets(&source)? {
        if args.names {
            let name = installer.query_fileset_name(&source, &info.id)?;
            println!("{} {} {} {}", info.id, name, info.file_count, info.file_size);
        } else {
            println!("{} {} {}", info.id, info.file_count, info.file_size);
        }
    }
    Ok(EXIT_OK)
}

fn install(mut installer: Installer<'_>, args: SelectionArgs) -> Result<i32> {
    let mut source = installer.open_source_repository(&args.source)?;
    let mut target = installer.open_target_repository(&args.target)?;
    let desired = DesiredState {
        fileset_ids: args.filesets,
    };
    installer.execute(
        Action::Install,
        &mut target,
        Some(&mut source),
        Some(&desired),
    )?;
    Ok(EXIT_OK)
}

fn configure(mut installer: Installer<'_>, args: SelectionArgs) -> Result<i32> {
    let mut source = installer.open_source_repository(&args.source)?;
    let mut target = installer.open_target_repository(&args.target)?;
    let desired = DesiredState {
        fileset_ids: args.filesets,
    };
    installer.execute(
        Action::Configure,
        &mut target,
        Some(&mut source),
        Some(&desired),
    )?;
    Ok(EXIT_OK)
}

fn print_summary(summary: &ValidationSummary) {
    println!(
        "OK {} CORRUPTED/MISSING {}",
        summary.ok,
        summary.corrupted + summary.missing
    );
}

fn exit_for(summary: &ValidationSummary) -> i32 {
    if summary.is_clean() {
        EXIT_OK
    } else {
        EXIT_VALIDATION_FAULTS
    }
}
