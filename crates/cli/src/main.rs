//! CLI for Phoenix organizations, versioned problems/tutorials and judge records.
//!
//! Every command acts as the principal given by `--as`; without it the
//! caller is anonymous. Results are printed to stdout as JSON, logs go to
//! stderr.

use clap::{Args, Parser, Subcommand};
use phoenix_access::{ListQuery, Phoenix};
use phoenix_core::{
    ArtifactSet, OrgId, PhoenixConfig, PhoenixError, Principal, RecordId, ResourceChanges,
    ResourceDraft, ResourceId, ResourceKind, UserId, Verdict,
};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "phoenix", version, about = "Organization-scoped problems and tutorials")]
struct Cli {
    /// YAML configuration file.
    #[arg(long, global = true, env = "PHOENIX_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides `data_dir` from the configuration.
    #[arg(long, global = true, env = "PHOENIX_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Act as this user id.
    #[arg(long = "as", global = true, env = "PHOENIX_USER")]
    user: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Organizations and memberships.
    Org {
        #[command(subcommand)]
        command: OrgCommand,
    },
    /// Problems (artifacts: description, input, output).
    Problem {
        #[command(subcommand)]
        command: ResourceCommand,
    },
    /// Tutorials (artifact: content).
    Tutorial {
        #[command(subcommand)]
        command: ResourceCommand,
    },
    /// Judge records of problem submissions.
    Judge {
        #[command(subcommand)]
        command: JudgeCommand,
    },
}

#[derive(Subcommand, Debug)]
enum JudgeCommand {
    /// Record a judged submission on a problem the caller can read.
    Submit {
        problem: u64,
        /// AC, WA, TLE, RE or the numeric code 0..=3.
        #[arg(long)]
        verdict: Verdict,
        #[arg(long)]
        language: String,
        /// Source file that was judged.
        #[arg(long)]
        code: PathBuf,
    },
    /// The caller's records on a problem.
    Records {
        problem: u64,
    },
    /// Source code of one of the caller's records.
    Code {
        record: u64,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum OrgCommand {
    Create {
        name: String,
        #[arg(long, default_value = "")]
        profile: String,
    },
    Update {
        org: u64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        profile: Option<String>,
    },
    Dissolve {
        org: u64,
    },
    /// Invite a user; they become a member once they accept.
    Invite {
        org: u64,
        user: u64,
        #[arg(long, default_value_t = false)]
        admin: bool,
    },
    Accept {
        org: u64,
    },
    Promote {
        org: u64,
        user: u64,
    },
    Demote {
        org: u64,
        user: u64,
    },
    Remove {
        org: u64,
        user: u64,
    },
    Quit {
        org: u64,
    },
    Members {
        org: u64,
    },
    /// Organizations the caller belongs to.
    Mine,
    /// Invitations waiting for the caller.
    Invitations,
}

#[derive(Subcommand, Debug)]
enum ResourceCommand {
    Create {
        #[arg(long)]
        org: u64,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        summary: String,
        #[arg(long, default_value_t = 0)]
        difficulty: i32,
        /// 0 creator, 1 admins, 2 members, 3 public.
        #[arg(long, default_value_t = 2)]
        readable: i32,
        /// 0 creator, 1 or 2 admins.
        #[arg(long, default_value_t = 1)]
        writable: i32,
        #[command(flatten)]
        artifacts: ArtifactArgs,
    },
    Show {
        id: u64,
    },
    /// Print one artifact of the current version.
    Read {
        id: u64,
        name: String,
        /// Write the raw bytes here instead of printing them.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    Version {
        id: u64,
    },
    Update {
        id: u64,
        /// Version the new artifacts are based on.
        #[arg(long)]
        expected_version: u32,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        summary: Option<String>,
        #[arg(long)]
        difficulty: Option<i32>,
        #[arg(long)]
        readable: Option<i32>,
        #[arg(long)]
        writable: Option<i32>,
        #[command(flatten)]
        artifacts: ArtifactArgs,
    },
    Delete {
        id: u64,
    },
    List {
        #[arg(long, default_value_t = 1)]
        page: usize,
        /// 1 newest, 2 name, 3 difficulty; negate to reverse.
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        sorter: i32,
        #[arg(long)]
        keyword: Option<String>,
    },
}

#[derive(Args, Debug)]
struct ArtifactArgs {
    /// `name=path`, once per artifact.
    #[arg(long = "artifact", value_parser = parse_artifact)]
    artifacts: Vec<(String, PathBuf)>,
}

impl ArtifactArgs {
    fn load(&self) -> std::io::Result<ArtifactSet> {
        self.artifacts
            .iter()
            .map(|(name, path)| Ok((name.clone(), std::fs::read(path)?)))
            .collect()
    }
}

fn parse_artifact(raw: &str) -> Result<(String, PathBuf), String> {
    match raw.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => {
            Ok((name.to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected name=path, got `{raw}`")),
    }
}

fn load_config(cli: &Cli) -> Result<PhoenixConfig, Box<dyn std::error::Error>> {
    let config = match &cli.config {
        Some(path) => PhoenixConfig::from_yaml_str(&std::fs::read_to_string(path)?)?,
        None => PhoenixConfig::default(),
    };
    Ok(match &cli.data_dir {
        Some(dir) => config.with_data_dir(dir),
        None => config,
    })
}

fn signed_in(principal: &Principal) -> Result<UserId, PhoenixError> {
    principal
        .user_id()
        .ok_or_else(|| PhoenixError::Forbidden("pass --as <user-id>".into()))
}

fn emit<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter)),
        )
        .init();

    let principal = Principal::from(cli.user.map(UserId));
    let phoenix = Phoenix::open(&config).await?;
    tracing::debug!(?principal, data_dir = %config.data_dir.display(), "ready");

    match cli.command {
        Commands::Org { command } => run_org(&phoenix, &principal, command).await,
        Commands::Problem { command } => {
            run_resource(&phoenix, &principal, ResourceKind::Problem, command).await
        }
        Commands::Tutorial { command } => {
            run_resource(&phoenix, &principal, ResourceKind::Tutorial, command).await
        }
        Commands::Judge { command } => run_judge(&phoenix, &principal, command).await,
    }
}

async fn run_org(
    phoenix: &Phoenix,
    principal: &Principal,
    command: OrgCommand,
) -> Result<(), Box<dyn std::error::Error>> {
    let ledger = &phoenix.ledger;
    match command {
        OrgCommand::Create { name, profile } => {
            let user = signed_in(principal)?;
            emit(&ledger.create_organization(user, &name, &profile).await?)
        }
        OrgCommand::Update { org, name, profile } => {
            let user = signed_in(principal)?;
            let current = ledger.organization(OrgId(org)).await?;
            let name = name.unwrap_or(current.name);
            let profile = profile.unwrap_or(current.profile);
            emit(&ledger.update_organization(user, OrgId(org), &name, &profile).await?)
        }
        OrgCommand::Dissolve { org } => {
            ledger.dissolve(signed_in(principal)?, OrgId(org)).await?;
            emit(&serde_json::json!({ "dissolved": org }))
        }
        OrgCommand::Invite { org, user, admin } => {
            let caller = signed_in(principal)?;
            emit(&ledger.invite(caller, UserId(user), OrgId(org), admin).await?)
        }
        OrgCommand::Accept { org } => {
            emit(&ledger.accept(signed_in(principal)?, OrgId(org)).await?)
        }
        OrgCommand::Promote { org, user } => set_admin(phoenix, principal, org, user, true).await,
        OrgCommand::Demote { org, user } => set_admin(phoenix, principal, org, user, false).await,
        OrgCommand::Remove { org, user } => {
            let caller = signed_in(principal)?;
            ledger.remove(caller, OrgId(org), UserId(user)).await?;
            emit(&serde_json::json!({ "org_id": org, "removed": user }))
        }
        OrgCommand::Quit { org } => {
            let user = signed_in(principal)?;
            ledger.quit(user, OrgId(org)).await?;
            emit(&serde_json::json!({ "org_id": org, "quit": user }))
        }
        OrgCommand::Members { org } => emit(&ledger.members(OrgId(org)).await?),
        OrgCommand::Mine => emit(&ledger.organizations_of(signed_in(principal)?).await?),
        OrgCommand::Invitations => {
            emit(&ledger.pending_invitations(signed_in(principal)?).await?)
        }
    }
}

async fn set_admin(
    phoenix: &Phoenix,
    principal: &Principal,
    org: u64,
    user: u64,
    admin: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let caller = signed_in(principal)?;
    phoenix
        .ledger
        .set_admin(caller, OrgId(org), UserId(user), admin)
        .await?;
    emit(&serde_json::json!({ "org_id": org, "user_id": user, "is_admin": admin }))
}

async fn run_resource(
    phoenix: &Phoenix,
    principal: &Principal,
    kind: ResourceKind,
    command: ResourceCommand,
) -> Result<(), Box<dyn std::error::Error>> {
    let catalog = &phoenix.catalog;
    match command {
        ResourceCommand::Create {
            org,
            name,
            summary,
            difficulty,
            readable,
            writable,
            artifacts,
        } => {
            let draft = ResourceDraft {
                name,
                summary,
                difficulty,
                org_id: OrgId(org),
                readable,
                writable,
            };
            let artifacts = artifacts.load()?;
            emit(&catalog.create(principal, kind, draft, &artifacts).await?)
        }
        ResourceCommand::Show { id } => emit(&catalog.get(principal, kind, ResourceId(id)).await?),
        ResourceCommand::Read { id, name, out } => {
            let content = catalog
                .read_artifact(principal, kind, ResourceId(id), &name)
                .await?;
            match out {
                Some(path) => {
                    std::fs::write(&path, &content)?;
                    emit(&serde_json::json!({
                        "name": name,
                        "path": path,
                        "bytes": content.len(),
                    }))
                }
                None => emit(&serde_json::json!({
                    "name": name,
                    "content": String::from_utf8_lossy(&content),
                })),
            }
        }
        ResourceCommand::Version { id } => {
            let version = catalog.version(principal, kind, ResourceId(id)).await?;
            emit(&serde_json::json!({ "id": id, "version": version }))
        }
        ResourceCommand::Update {
            id,
            expected_version,
            name,
            summary,
            difficulty,
            readable,
            writable,
            artifacts,
        } => {
            let changes = ResourceChanges {
                name,
                summary,
                difficulty,
                readable,
                writable,
            };
            let artifacts = artifacts.load()?;
            let view = catalog
                .update(principal, kind, ResourceId(id), expected_version, &changes, &artifacts)
                .await?;
            emit(&view)
        }
        ResourceCommand::Delete { id } => {
            catalog.delete(principal, kind, ResourceId(id)).await?;
            emit(&serde_json::json!({ "deleted": id }))
        }
        ResourceCommand::List {
            page,
            sorter,
            keyword,
        } => {
            let query = ListQuery {
                page,
                sorter,
                keyword,
            };
            emit(&catalog.list(principal, kind, &query).await?)
        }
    }
}

async fn run_judge(
    phoenix: &Phoenix,
    principal: &Principal,
    command: JudgeCommand,
) -> Result<(), Box<dyn std::error::Error>> {
    let catalog = &phoenix.catalog;
    match command {
        JudgeCommand::Submit {
            problem,
            verdict,
            language,
            code,
        } => {
            let code = std::fs::read(&code)?;
            let record = catalog
                .submit_record(principal, ResourceId(problem), verdict, &language, &code)
                .await?;
            emit(&record)
        }
        JudgeCommand::Records { problem } => {
            emit(&catalog.records(principal, ResourceId(problem)).await?)
        }
        JudgeCommand::Code { record, out } => {
            let code = catalog.record_code(principal, RecordId(record)).await?;
            match out {
                Some(path) => {
                    std::fs::write(&path, &code)?;
                    emit(&serde_json::json!({ "record": record, "path": path }))
                }
                None => emit(&serde_json::json!({
                    "record": record,
                    "code": String::from_utf8_lossy(&code),
                })),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_argument_splits_on_first_equals() {
        assert_eq!(
            parse_artifact("input=cases/a=b.txt").unwrap(),
            ("input".to_string(), PathBuf::from("cases/a=b.txt"))
        );
        assert!(parse_artifact("input").is_err());
        assert!(parse_artifact("=x").is_err());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "phoenix", "problem", "list", "--sorter", "-3", "--as", "7",
        ])
        .unwrap();
        assert_eq!(cli.user, Some(7));
        match cli.command {
            Commands::Problem {
                command: ResourceCommand::List { sorter, page, .. },
            } => {
                assert_eq!(sorter, -3);
                assert_eq!(page, 1);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn repeated_artifacts_are_collected() {
        let cli = Cli::try_parse_from([
            "phoenix",
            "tutorial",
            "update",
            "4",
            "--expected-version",
            "2",
            "--artifact",
            "content=intro.md",
        ])
        .unwrap();
        let Commands::Tutorial {
            command: ResourceCommand::Update { artifacts, .. },
        } = cli.command
        else {
            panic!("expected tutorial update");
        };
        assert_eq!(artifacts.artifacts.len(), 1);
    }

    #[test]
    fn judge_submit_parses_verdict() {
        let cli = Cli::try_parse_from([
            "phoenix", "judge", "submit", "3", "--verdict", "tle", "--language", "rust", "--code",
            "main.rs",
        ])
        .unwrap();
        let Commands::Judge {
            command: JudgeCommand::Submit { problem, verdict, .. },
        } = cli.command
        else {
            panic!("expected judge submit");
        };
        assert_eq!(problem, 3);
        assert_eq!(verdict, Verdict::TimeLimitExceeded);

        assert!(Cli::try_parse_from([
            "phoenix", "judge", "submit", "3", "--verdict", "ok", "--language", "rust", "--code",
            "main.rs",
        ])
        .is_err());
    }
}
