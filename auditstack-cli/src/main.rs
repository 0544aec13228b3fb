mod config;
mod stack;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use colored::Colorize;
use env_logger::Env;
use similar::{ChangeTag, TextDiff};

use auditstack_core::differ::diff_templates;
use auditstack_core::network::{Network, RouteTarget, Subnet};
use auditstack_core::plan::{Change, ChangeSet, format_change_brief};
use auditstack_core::resource::ResourceKind;
use auditstack_core::review::check_public_only;
use auditstack_core::template::synthesize;

use config::{AuditConfig, DEFAULT_CONFIG_FILE};
use stack::{AuditStack, NO_NAT_CONDITION};

#[derive(Parser)]
#[command(name = "auditstack")]
#[command(about = "Synthesize the audit task stack into a CloudFormation template", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, short, global = true, env = "AUDITSTACK_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Log at debug level
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the synthesized template
    Synth {
        /// Write the template to a file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Build and check the stack without printing the template
    Validate,
    /// Show the network layout and which routes are suppressed
    Inspect,
    /// Compare the synthesized template with a previously deployed one
    Diff {
        /// Path to the previous template (JSON)
        previous: PathBuf,

        /// Show a line diff of the templates
        #[arg(long)]
        text: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    let result = match cli.command {
        Commands::Synth { output } => run_synth(&cli.config, output.as_deref()),
        Commands::Validate => run_validate(&cli.config),
        Commands::Inspect => run_inspect(&cli.config),
        Commands::Diff { previous, text } => run_diff(&cli.config, &previous, text),
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

/// Load the configuration, assemble the stack, synthesize, and review the template
fn build_template(config_path: &Path) -> Result<(AuditStack, serde_json::Value)> {
    let config = AuditConfig::load(config_path)?;
    let audit = stack::build(&config)?;
    let template = synthesize(&audit.stack).context("Failed to synthesize template")?;

    let findings = check_public_only(&template);
    if !findings.is_empty() {
        for finding in &findings {
            eprintln!("  {} {}", "✗".red(), finding);
        }
        bail!("template would route private subnets to the internet ({} findings)", findings.len());
    }
    Ok((audit, template))
}

fn run_synth(config_path: &Path, output: Option<&Path>) -> Result<()> {
    let (_, template) = build_template(config_path)?;
    let rendered = render_template(&template)?;

    match output {
        Some(path) => {
            fs::write(path, &rendered)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("{} {}", "Wrote".green().bold(), path.display());
        }
        None => print!("{}", rendered),
    }
    Ok(())
}

fn run_validate(config_path: &Path) -> Result<()> {
    let (audit, template) = build_template(config_path)?;
    let resources = template["Resources"].as_object().map_or(0, |r| r.len());

    println!("{}", "✓ Stack is valid".green().bold());
    println!("  Resources: {}", resources);
    println!(
        "  Private routes gated on {}: {}",
        NO_NAT_CONDITION.cyan(),
        audit.suppression.total()
    );
    Ok(())
}

fn run_inspect(config_path: &Path) -> Result<()> {
    let (audit, _) = build_template(config_path)?;

    for network in audit.stack.networks() {
        print_network(network);
    }
    if audit.suppression.already_suppressed > 0 {
        println!(
            "{} routes were already suppressed",
            audit.suppression.already_suppressed
        );
    }
    Ok(())
}

fn run_diff(config_path: &Path, previous_path: &Path, text: bool) -> Result<()> {
    let content = fs::read_to_string(previous_path)
        .with_context(|| format!("Failed to read {}", previous_path.display()))?;
    let previous: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", previous_path.display()))?;

    let (_, current) = build_template(config_path)?;
    let changes = diff_templates(&previous, &current)?;
    print_changes(&changes);

    if text {
        print_diff(
            previous_path,
            &render_template(&previous)?,
            &render_template(&current)?,
        );
    }
    Ok(())
}

fn render_template(template: &serde_json::Value) -> Result<String> {
    let mut rendered = serde_json::to_string_pretty(template)?;
    rendered.push('\n');
    Ok(rendered)
}

fn print_network(network: &Network) {
    println!("{} {}", "Network".cyan().bold(), network.id().bold());
    println!(
        "  VPC {} ({} AZs, {} NAT gateways)",
        network.vpc_id(),
        network.props().max_azs,
        network.nat_gateways().count()
    );

    let subnets: Vec<&Subnet> = network
        .public_subnets()
        .iter()
        .chain(network.private_subnets())
        .collect();
    for (i, subnet) in subnets.iter().enumerate() {
        let is_last = i == subnets.len() - 1;
        let connector = if is_last { "└─" } else { "├─" };
        let continuation = if is_last { "   " } else { "│  " };

        println!(
            "  {} {} {} {}",
            connector,
            subnet.logical_id().bold(),
            subnet.subnet_type().label(),
            subnet.cidr().to_string().dimmed()
        );
        for route in subnet.default_routes() {
            let target = match RouteTarget::of(route) {
                RouteTarget::InternetGateway(id) => format!("-> {}", id).green(),
                RouteTarget::NatGateway(id) => format!("-> {}", id).yellow(),
                RouteTarget::None => "-> (no target)".normal(),
            };
            let gate = match route.condition() {
                Some(condition) if condition.is_always_false() => {
                    format!("suppressed by {}", condition.name()).red()
                }
                Some(condition) => format!("when {}", condition.name()).yellow(),
                None => "".normal(),
            };
            println!("  {}   {} {} {}", continuation, route.logical_id, target, gate);
        }
        let others = subnet
            .children()
            .iter()
            .filter(|r| r.kind() != ResourceKind::Route)
            .count();
        println!("  {}   {} other resources", continuation, others);
    }
    println!();
}

fn print_changes(changes: &ChangeSet) {
    if changes.is_empty() {
        println!("{}", "No changes. Template is up-to-date.".green());
        return;
    }

    println!("{}", "Changes:".cyan().bold());
    for (resource_type, group) in changes.group_by_type() {
        println!();
        println!("  {}", resource_type.cyan());
        for change in group {
            let line = format_change_brief(change);
            let line = match change {
                Change::Add { .. } => line.green(),
                Change::Modify { .. } if change.is_replacement() => line.red(),
                Change::Modify { .. } => line.yellow(),
                Change::Remove { .. } => line.red(),
            };
            println!("    {}", line);
        }
    }
    println!();
    println!("{}", changes.summary().to_string().bold());
}

fn print_diff(file: &Path, previous: &str, current: &str) {
    println!("\n{} {}:", "Diff against".cyan().bold(), file.display());

    let diff = TextDiff::from_lines(previous, current);
    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => "-".red(),
            ChangeTag::Insert => "+".green(),
            ChangeTag::Equal => " ".normal(),
        };
        print!("{}{}", sign, change);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VALID: &str = r#"
bucket_name = "audit-reports"
role_name = "AuditReadOnly"
alarm_destination = "arn:aws:sns:us-east-1:123456789012:ops-alarms"
"#;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn synth_writes_template() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_file(dir.path(), "auditstack.toml", VALID);
        let output = dir.path().join("template.json");

        run_synth(&config, Some(&output)).unwrap();

        let template: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(template["AWSTemplateFormatVersion"], "2010-09-09");
        assert!(template["Conditions"].get(NO_NAT_CONDITION).is_some());
    }

    #[test]
    fn placeholder_config_stops_before_synthesis() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_file(
            dir.path(),
            "auditstack.toml",
            include_str!("../../auditstack.toml"),
        );
        let output = dir.path().join("template.json");

        let err = run_synth(&config, Some(&output)).unwrap_err();
        assert!(err.to_string().contains("CHANGE_ME"));
        assert!(!output.exists());
    }

    #[test]
    fn diff_against_same_template_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_file(dir.path(), "auditstack.toml", VALID);
        let (_, template) = build_template(&config).unwrap();

        let changes = diff_templates(&template, &template).unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn diff_reports_widened_network() {
        let dir = tempfile::tempdir().unwrap();
        let narrow = write_file(dir.path(), "narrow.toml", VALID);
        let wide = write_file(
            dir.path(),
            "wide.toml",
            &format!("{}\n[network]\nmax_azs = 3\n", VALID),
        );
        let (_, previous) = build_template(&narrow).unwrap();
        let (_, current) = build_template(&wide).unwrap();

        let changes = diff_templates(&previous, &current).unwrap();
        let added: Vec<&str> = changes
            .changes()
            .iter()
            .filter(|c| matches!(c, Change::Add { .. }))
            .map(|c| c.logical_id())
            .collect();
        assert!(added.contains(&"VpcPrivateSubnet3DefaultRoute"));
        assert!(added.contains(&"VpcPublicSubnet3Subnet"));
    }

    #[test]
    fn rendered_template_ends_with_newline() {
        let rendered = render_template(&serde_json::json!({ "Resources": {} })).unwrap();
        assert!(rendered.ends_with("}\n"));
    }
}
