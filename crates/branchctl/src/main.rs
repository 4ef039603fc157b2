mod output;

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use conversation_tree::{
    BranchId, BranchOptions, ConversationManager, ConversationTree, FileTreeStorage, MergeStrategy,
    NewMessage, NodeId, NodeMetadata, Role, TreeConfig,
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "branchctl")]
#[command(about = "Fork, compare and merge branching conversations")]
#[command(version)]
struct Cli {
    /// Directory holding conversation snapshots
    #[arg(long, env = "BRANCHCTL_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Conversation to operate on
    #[arg(long, short, default_value = "default")]
    conversation: String,

    /// Config file (defaults to ./branchctl.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the conversation if it does not exist
    Init {
        /// Assistant greeting used as the root message
        #[arg(long)]
        greeting: Option<String>,
    },
    /// Append a message at the cursor
    Add {
        content: String,
        #[arg(long, value_enum, default_value = "user")]
        role: RoleArg,
        /// Append after this branch's leaf instead of the cursor
        #[arg(long)]
        branch: Option<String>,
        #[arg(long)]
        model: Option<String>,
    },
    /// Create an edited copy of a message next to the original
    Edit { node: String, content: String },
    /// Record a regenerated assistant answer next to the original
    Regenerate {
        node: String,
        content: String,
        #[arg(long)]
        model: Option<String>,
    },
    /// Create a branch ending at a node (the cursor by default)
    Fork {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        color: Option<String>,
    },
    /// Move the cursor to a branch's leaf
    Switch { branch: String },
    /// Move the cursor to a node
    Goto { node: String },
    /// Move the cursor to its parent
    Back,
    /// Move the cursor one step towards the current branch's leaf
    Forward,
    /// List branches
    Branches,
    /// Print the path from the root to the cursor or to a branch's leaf
    Show {
        #[arg(long)]
        branch: Option<String>,
    },
    /// Compare two branches
    Compare { branch_a: String, branch_b: String },
    /// Merge SOURCE into TARGET
    Merge {
        source: String,
        target: String,
        #[arg(long, default_value = "append")]
        strategy: MergeStrategy,
        /// Register the result as a new branch with this name
        #[arg(long)]
        into_new: Option<String>,
        /// Register the result as a new, automatically named branch
        #[arg(long, conflicts_with = "into_new")]
        new_branch: bool,
    },
    Rename { branch: String, name: String },
    /// Toggle a branch's favorite flag
    Favorite { branch: String },
    Color { branch: String, color: String },
    /// Delete a node and everything below it
    DeleteNode {
        node: String,
        /// Move affected branches to the node's parent instead of dropping them
        #[arg(long)]
        preserve_branches: bool,
    },
    DeleteBranch { branch: String },
    /// List subtrees detached by replace merges
    Detached,
    /// Restore a detached subtree
    Restore { id: String },
    /// Drop all detached subtrees
    Purge,
    /// List stored conversations
    List,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum RoleArg {
    User,
    Assistant,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::User => Role::User,
            RoleArg::Assistant => Role::Assistant,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    run(cli).await
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(
            fmt::layer()
                .with_target(true)
                .with_line_number(true)
                .with_file(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn data_dir(cli: &Cli) -> anyhow::Result<PathBuf> {
    if let Some(dir) = &cli.data_dir {
        return Ok(dir.clone());
    }
    dirs::data_dir()
        .map(|dir| dir.join("branchctl"))
        .ok_or_else(|| anyhow!("no data directory available, pass --data-dir"))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = TreeConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    let storage = FileTreeStorage::new(data_dir(&cli)?);
    tracing::debug!(
        data_dir = %storage.base_path().display(),
        conversation = %cli.conversation,
        "branchctl: Starting"
    );

    if let Commands::List = cli.command {
        let ids = conversation_tree::TreeStorage::list_trees(&storage).await?;
        output::print_conversation_list(&ids);
        return Ok(());
    }

    if let Commands::Init { greeting: Some(greeting) } = &cli.command {
        if !conversation_tree::TreeStorage::tree_exists(&storage, &cli.conversation).await {
            let tree = ConversationTree::with_greeting(greeting.clone(), config.clone());
            ConversationManager::from_tree(storage.clone(), cli.conversation.clone(), tree).await?;
        }
    }

    let manager = ConversationManager::open(storage, cli.conversation.clone(), config).await?;
    execute(&manager, cli.command).await
}

async fn execute(manager: &ConversationManager<FileTreeStorage>, command: Commands) -> anyhow::Result<()> {
    let tree = manager.snapshot().await;

    match command {
        Commands::Init { .. } => {
            println!(
                "{}",
                format!("✅ Conversation '{}' ready", manager.conversation_id()).green()
            );
            output::print_navigation(&manager.navigation_state().await);
        }
        Commands::List => {}
        Commands::Add {
            content,
            role,
            branch,
            model,
        } => {
            let mut message = NewMessage::new(role.into(), content);
            if let Some(model) = model {
                message = message.with_model(model);
            }
            let node_id = match branch {
                Some(branch) => {
                    let branch_id = resolve_branch(&tree, &branch)?;
                    manager.add_message_to_branch(branch_id, message).await?
                }
                None => manager.add_message(message).await?,
            };
            println!("{} {}", "Added".green(), output::short_id(node_id));
        }
        Commands::Edit { node, content } => {
            let node_id = resolve_node(&tree, &node)?;
            let edited = manager.edit_message(node_id, content).await?;
            println!("{} {}", "Edited as".green(), output::short_id(edited));
        }
        Commands::Regenerate {
            node,
            content,
            model,
        } => {
            let node_id = resolve_node(&tree, &node)?;
            let metadata = NodeMetadata {
                model,
                ..Default::default()
            };
            let regenerated = manager.regenerate_response(node_id, content, metadata).await?;
            println!("{} {}", "Regenerated as".green(), output::short_id(regenerated));
        }
        Commands::Fork { name, from, color } => {
            let from_node = match from {
                Some(node) => resolve_node(&tree, &node)?,
                None => tree.current_node_id(),
            };
            let options = BranchOptions {
                name,
                color,
                ..Default::default()
            };
            let branch_id = manager.create_branch(from_node, options).await?;
            let snapshot = manager.snapshot().await;
            let branch = snapshot.get_branch(branch_id)?;
            println!("{} {}", "Created branch".green(), branch.name.bold());
        }
        Commands::Switch { branch } => {
            let branch_id = resolve_branch(&tree, &branch)?;
            manager.switch_to_branch(branch_id).await?;
            output::print_navigation(&manager.navigation_state().await);
        }
        Commands::Goto { node } => {
            let node_id = resolve_node(&tree, &node)?;
            manager.switch_to_node(node_id).await?;
            output::print_navigation(&manager.navigation_state().await);
        }
        Commands::Back => {
            manager.go_back().await?;
            output::print_navigation(&manager.navigation_state().await);
        }
        Commands::Forward => {
            manager.go_forward().await?;
            output::print_navigation(&manager.navigation_state().await);
        }
        Commands::Branches => {
            output::print_branches(&tree);
        }
        Commands::Show { branch } => {
            let leaf = match branch {
                Some(branch) => tree.get_branch(resolve_branch(&tree, &branch)?)?.leaf_node_id,
                None => tree.current_node_id(),
            };
            output::print_path(&tree, &manager.get_path(leaf).await?);
        }
        Commands::Compare { branch_a, branch_b } => {
            let a = resolve_branch(&tree, &branch_a)?;
            let b = resolve_branch(&tree, &branch_b)?;
            output::print_comparison(&manager.compare_branches(a, b).await?);
        }
        Commands::Merge {
            source,
            target,
            strategy,
            into_new,
            new_branch,
        } => {
            let source_id = resolve_branch(&tree, &source)?;
            let target_id = resolve_branch(&tree, &target)?;
            if into_new.is_some() || new_branch {
                let (branch_id, tip) = manager
                    .merge_into_new_branch(source_id, target_id, strategy, into_new)
                    .await?;
                let snapshot = manager.snapshot().await;
                println!(
                    "{} {} (tip {})",
                    format!("Merged ({strategy}) into new branch").green(),
                    snapshot.get_branch(branch_id)?.name.bold(),
                    output::short_id(tip)
                );
            } else {
                let tip = manager.merge_branches(source_id, target_id, strategy).await?;
                println!(
                    "{} {} → {} (tip {})",
                    format!("Merged ({strategy})").green(),
                    source.bold(),
                    target.bold(),
                    output::short_id(tip)
                );
            }
        }
        Commands::Rename { branch, name } => {
            let branch_id = resolve_branch(&tree, &branch)?;
            manager.rename_branch(branch_id, name.clone()).await?;
            println!("{} {}", "Renamed to".green(), name.bold());
        }
        Commands::Favorite { branch } => {
            let branch_id = resolve_branch(&tree, &branch)?;
            let is_favorite = manager.toggle_branch_favorite(branch_id).await?;
            let label = if is_favorite { "★ favorite" } else { "☆ not favorite" };
            println!("{} {}", branch.bold(), label.yellow());
        }
        Commands::Color { branch, color } => {
            let branch_id = resolve_branch(&tree, &branch)?;
            manager.set_branch_color(branch_id, color).await?;
            println!("{} {}", "Color set for".green(), branch.bold());
        }
        Commands::DeleteNode {
            node,
            preserve_branches,
        } => {
            let node_id = resolve_node(&tree, &node)?;
            let removed = manager.delete_node(node_id, preserve_branches).await?;
            println!("{} {} node(s)", "Deleted".red(), removed);
        }
        Commands::DeleteBranch { branch } => {
            let branch_id = resolve_branch(&tree, &branch)?;
            let removed = manager.delete_branch(branch_id).await?;
            println!("{} {}", "Deleted branch".red(), removed.name.bold());
        }
        Commands::Detached => {
            output::print_detached(tree.detached());
        }
        Commands::Restore { id } => {
            let detached_id = resolve_detached(&tree, &id)?;
            let root = manager.restore_detached(detached_id).await?;
            println!("{} {}", "Restored subtree at".green(), output::short_id(root));
        }
        Commands::Purge => {
            let purged = manager.purge_detached().await?;
            println!("{} {} detached subtree(s)", "Purged".red(), purged);
        }
    }

    Ok(())
}

/// Accepts a branch name, a full id or an unambiguous id prefix.
fn resolve_branch(tree: &ConversationTree, reference: &str) -> anyhow::Result<BranchId> {
    if let Some(branch) = tree.find_branch_by_name(reference) {
        return Ok(branch.id);
    }
    unique_prefix(tree.branches().iter().map(|b| b.id), reference)
        .with_context(|| format!("Unknown branch '{reference}'"))
}

/// Accepts a full node id or an unambiguous prefix.
fn resolve_node(tree: &ConversationTree, reference: &str) -> anyhow::Result<NodeId> {
    unique_prefix(tree.nodes().map(|n| n.id), reference)
        .with_context(|| format!("Unknown node '{reference}'"))
}

fn resolve_detached(tree: &ConversationTree, reference: &str) -> anyhow::Result<Uuid> {
    unique_prefix(tree.detached().iter().map(|d| d.id), reference)
        .with_context(|| format!("Unknown detached subtree '{reference}'"))
}

fn unique_prefix(ids: impl Iterator<Item = Uuid>, reference: &str) -> anyhow::Result<Uuid> {
    let reference = reference.trim().to_ascii_lowercase();
    if reference.is_empty() {
        bail!("empty id");
    }
    let matches: Vec<Uuid> = ids
        .filter(|id| id.to_string().starts_with(&reference))
        .collect();
    match matches.as_slice() {
        [id] => Ok(*id),
        [] => bail!("no match"),
        _ => bail!("'{reference}' matches {} ids", matches.len()),
    }
}
