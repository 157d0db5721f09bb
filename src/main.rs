//! coffer CLI - Main entry point.

use coffer::cli::{Cli, Commands, ContCommands};
use coffer::client::ContClient;
use coffer::config::{CofferConfig, StorageBackend};
use coffer::container::ContOpIn;
use coffer::types::{ContHandleId, ContOpenFlags, ContainerId, PoolCapas, PoolHandleId, PoolId};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Server {
            node_id,
            bind_addr,
            pool,
            targets,
            target_addr,
            remote_targets,
            metadata_dir,
        } => {
            let mut config = match &cli.config {
                Some(path) => CofferConfig::from_file(path)?,
                None => CofferConfig::development(),
            };

            if let Some(node_id) = node_id {
                config.node.id = node_id;
            }
            if let Some(addr) = bind_addr {
                config.service.bind_addr = addr.parse()?;
            }
            if let Some(pool) = pool {
                config.service.pool_uuid = PoolId::parse(&pool)?;
            }
            if let Some(targets) = targets {
                config.target.local_targets = targets;
            }
            if let Some(addr) = target_addr {
                config.target.bind_addr = Some(addr.parse()?);
            }
            if let Some(remote) = remote_targets {
                config.target.remote = remote.split(',').map(|s| s.to_string()).collect();
            }
            if let Some(dir) = metadata_dir {
                config.storage.backend = StorageBackend::RocksDb;
                config.storage.metadata_dir = dir;
            }

            config.observability.log_level = cli.log_level;

            println!("Serving pool {}", config.service.pool_uuid);
            coffer::run(config).await?;
        }

        Commands::Cont {
            addr,
            pool_hdl,
            command,
        } => {
            let client = ContClient::from_addr(&addr)?;
            let pool_hdl = PoolHandleId::parse(&pool_hdl)?;
            run_cont_command(&client, pool_hdl, command).await?;
        }

        Commands::Health { addr } => {
            let client = ContClient::from_addr(&addr)?;
            match client.health().await {
                Ok(healthy) => {
                    println!("Health: {}", if healthy { "OK" } else { "DEGRADED" });
                }
                Err(e) => {
                    eprintln!("Health: UNREACHABLE ({})", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Version => {
            println!("coffer v{}", env!("CARGO_PKG_VERSION"));
            println!("Container metadata service for a distributed object-storage pool");
        }
    }

    Ok(())
}

fn op(pool_hdl: PoolHandleId, cont: &str, hdl: Option<&str>) -> anyhow::Result<ContOpIn> {
    Ok(ContOpIn {
        pool_hdl,
        cont: ContainerId::parse(cont)?,
        hdl: match hdl {
            Some(hdl) => ContHandleId::parse(hdl)?,
            None => ContHandleId::new(),
        },
    })
}

fn parse_capas(capas: &str) -> anyhow::Result<PoolCapas> {
    match capas {
        "ro" => Ok(PoolCapas::RO),
        "rw" => Ok(PoolCapas::RW),
        "ex" => Ok(PoolCapas::EX),
        other => anyhow::bail!("unknown capability {:?} (expected ro, rw or ex)", other),
    }
}

async fn run_cont_command(
    client: &ContClient,
    pool_hdl: PoolHandleId,
    command: ContCommands,
) -> anyhow::Result<()> {
    match command {
        ContCommands::Connect { capas } => {
            client.connect(pool_hdl, parse_capas(&capas)?).await?;
            println!("Connected {}", pool_hdl);
        }
        ContCommands::Disconnect => {
            client.disconnect(&[pool_hdl]).await?;
            println!("Disconnected {}", pool_hdl);
        }
        ContCommands::Create { cont } => {
            let cont = match cont {
                Some(cont) => ContainerId::parse(&cont)?,
                None => ContainerId::new(),
            };
            client
                .create(ContOpIn {
                    pool_hdl,
                    cont,
                    hdl: ContHandleId::new(),
                })
                .await?;
            println!("Created {}", cont);
        }
        ContCommands::Destroy { cont, force } => {
            client.destroy(op(pool_hdl, &cont, None)?, force).await?;
            println!("Destroyed {}", cont);
        }
        ContCommands::Open { cont, hdl, write } => {
            let op = op(pool_hdl, &cont, hdl.as_deref())?;
            let capas = if write {
                ContOpenFlags::RW
            } else {
                ContOpenFlags::RO
            };
            client.open(op, capas).await?;
            println!("Opened {} handle {}", op.cont, op.hdl);
        }
        ContCommands::Close { cont, hdl } => {
            client.close(op(pool_hdl, &cont, Some(&hdl))?).await?;
            println!("Closed {}", hdl);
        }
        ContCommands::Query { cont, hdl } => {
            let info = client.query(op(pool_hdl, &cont, Some(&hdl))?).await?;
            println!("HCE:   {}", info.epoch.hce);
            println!("LRE:   {}", info.epoch.lre);
            println!("LHE:   {}", info.epoch.lhe);
            println!("GHCE:  {}", info.epoch.ghce);
            println!("GHPCE: {}", info.epoch.ghpce);
            println!("Min purged epoch: {}", info.min_purged_epoch);
        }
        ContCommands::AttrSet { cont, hdl, attrs } => {
            let pairs = attrs
                .iter()
                .map(|attr| {
                    attr.split_once('=')
                        .map(|(name, value)| (name, value.as_bytes()))
                        .ok_or_else(|| anyhow::anyhow!("expected name=value, got {:?}", attr))
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            client
                .attr_set(op(pool_hdl, &cont, Some(&hdl))?, &pairs)
                .await?;
            println!("Set {} attributes", pairs.len());
        }
        ContCommands::AttrGet {
            cont,
            hdl,
            names,
            size,
        } => {
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            let sizes = vec![size; names.len()];
            let values = client
                .attr_get(op(pool_hdl, &cont, Some(&hdl))?, &names, &sizes)
                .await?;
            for (name, value) in names.iter().zip(values) {
                let suffix = if value.is_truncated() { " (truncated)" } else { "" };
                println!(
                    "{} = {}{}",
                    name,
                    String::from_utf8_lossy(&value.value),
                    suffix
                );
            }
        }
        ContCommands::AttrList {
            cont,
            hdl,
            capacity,
        } => {
            let (total, names) = client
                .attr_list(op(pool_hdl, &cont, Some(&hdl))?, Some(capacity))
                .await?;
            for name in &names {
                println!("{}", name);
            }
            println!("Total name bytes: {}", total);
        }
        ContCommands::EpochCommit { cont, hdl, epoch } => {
            let state = client
                .epoch_commit(op(pool_hdl, &cont, Some(&hdl))?, epoch)
                .await?;
            println!("Committed {} (GHCE {})", state.hce, state.ghce);
        }
        ContCommands::EpochDiscard { cont, hdl, epoch } => {
            client
                .epoch_discard(op(pool_hdl, &cont, Some(&hdl))?, epoch)
                .await?;
            println!("Discarded from epoch {}", epoch);
        }
        ContCommands::SnapCreate { cont, hdl, epoch } => {
            client
                .snap_create(op(pool_hdl, &cont, Some(&hdl))?, epoch)
                .await?;
            println!("Snapshot at epoch {}", epoch);
        }
        ContCommands::SnapList {
            cont,
            hdl,
            capacity,
        } => {
            let (total, epochs) = client
                .snap_list(op(pool_hdl, &cont, Some(&hdl))?, capacity)
                .await?;
            for epoch in &epochs {
                println!("{}", epoch);
            }
            println!("Total snapshots: {}", total);
        }
        ContCommands::SnapDestroy { cont, hdl, epoch } => {
            client
                .snap_destroy(op(pool_hdl, &cont, Some(&hdl))?, epoch)
                .await?;
            println!("Destroyed snapshot {}", epoch);
        }
        ContCommands::OidAlloc { cont, hdl, count } => {
            let oid = client
                .oid_fetch_add(op(pool_hdl, &cont, Some(&hdl))?, count)
                .await?;
            println!("Allocated object ids {}..{}", oid, oid.saturating_add(count));
        }
    }
    Ok(())
}
