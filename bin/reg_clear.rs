/*
 * Copyright 2023 Aon Cyber Solutions
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use clap::{Arg, ArgAction, ArgMatches, Command};
use hivecred::{
    clear::{ClearBuilder, ClearOutcome, ClearReport},
    err::Error,
    reg_path::NameMatch,
};
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn hive_arg(name: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .value_name("FILE")
        .help(help)
        .required(true)
        .value_parser(clap::value_parser!(PathBuf))
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let matches = Command::new("Registry Credential Clear")
        .version("0.1")
        .subcommand_required(true)
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Decrypt and report without modifying any hive"),
        )
        .arg(
            Arg::new("exact-names")
                .long("exact-names")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Match path components against whole key and value names instead of prefixes"),
        )
        .arg(
            Arg::new("dump")
                .long("dump")
                .global(true)
                .value_name("FILE")
                .value_parser(clap::value_parser!(PathBuf))
                .help("Write the pwdump or mscash lines to this file"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Print the report as JSON"),
        )
        .subcommand(
            Command::new("local")
                .about("Blank local account passwords in a SAM hive")
                .arg(hive_arg("system", "SYSTEM hive"))
                .arg(hive_arg("sam", "SAM hive")),
        )
        .subcommand(
            Command::new("domain")
                .about("Blank domain cached credentials in a SECURITY hive")
                .arg(hive_arg("system", "SYSTEM hive"))
                .arg(hive_arg("security", "SECURITY hive")),
        )
        .get_matches();

    let (report, json) = match matches.subcommand() {
        Some(("local", sub)) => {
            let builder = builder(sub);
            (builder.clear_local(path(sub, "system"), path(sub, "sam"))?, sub.get_flag("json"))
        }
        Some(("domain", sub)) => {
            let builder = builder(sub);
            (builder.clear_domain(path(sub, "system"), path(sub, "security"))?, sub.get_flag("json"))
        }
        _ => unreachable!("a subcommand is required"),
    };
    print_report(&report, json)
}

fn builder(matches: &ArgMatches) -> ClearBuilder {
    let name_match = if matches.get_flag("exact-names") {
        NameMatch::Exact
    } else {
        NameMatch::Prefix
    };
    let mut builder = ClearBuilder::new()
        .name_match(name_match)
        .write_back(!matches.get_flag("dry-run"));
    if let Some(dump) = matches.get_one::<PathBuf>("dump") {
        builder = builder.dump_path(dump);
    }
    builder
}

fn path(matches: &ArgMatches, name: &str) -> PathBuf {
    matches.get_one::<PathBuf>(name).cloned().expect("Required value")
}

fn print_report(report: &ClearReport, json: bool) -> Result<(), Error> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if json {
        let text = serde_json::to_string_pretty(report)
            .map_err(|e| Error::Io { source: e.into() })?;
        writeln!(out, "{}", text)?;
        return Ok(());
    }
    match &report.outcome {
        ClearOutcome::Cleared(accounts) => {
            let verb = if report.written { "Cleared" } else { "Would clear" };
            writeln!(out, "{} {} account(s): {}", verb, accounts.len(), accounts.join(", "))?;
        }
        ClearOutcome::NothingToClear => writeln!(out, "Nothing to clear")?,
        ClearOutcome::NoSyskey => writeln!(out, "No syskey found in the SYSTEM hive")?,
        ClearOutcome::NoLsaKey => writeln!(out, "No supported LSA key found in the SECURITY hive")?,
        ClearOutcome::NoCacheKey => writeln!(out, "No NL$KM cache key found in the SECURITY hive")?,
    }
    if !report.dump.is_empty() {
        write!(out, "\n{}", report.dump)?;
    }
    if !report.logs.is_empty() {
        writeln!(out, "\nLogs\n-----------")?;
        report.logs.write(&mut out)?;
    }
    Ok(())
}
