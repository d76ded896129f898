//! MyList add, update and delete

use crate::Result;
use crate::commands::context::CommandContext;
use crate::commands::{CommandKind, CommandOutcome};
use crate::protocol::{UdpOutcome, UdpRequest, UdpResponse};
use crate::store::{AniDbRecord, RecordKind};
use log::info;
use serde_json::json;

const ALREADY_IN_MYLIST: u16 = 310;
const NO_SUCH_MYLIST_ENTRY: u16 = 411;

async fn save_entry(
    ctx: &CommandContext,
    ed2k: &str,
    response: &UdpResponse,
    watched: bool,
) -> Result<()> {
    let mylist_id = response
        .field(0)
        .and_then(|lid| lid.parse::<u64>().ok());
    ctx.records
        .save(&AniDbRecord::new(
            RecordKind::MyList,
            ed2k,
            json!({ "mylist_id": mylist_id, "watched": watched }),
            ctx.now(),
        ))
        .await
}

pub(super) async fn add_file(
    ctx: &CommandContext,
    size: u64,
    ed2k: &str,
    watched: bool,
) -> Result<CommandOutcome> {
    match ctx.client.send(UdpRequest::mylist_add(size, ed2k, watched)).await {
        UdpOutcome::Success(response) => {
            if response.code == ALREADY_IN_MYLIST {
                info!("{ed2k} is already in MyList");
            }
            save_entry(ctx, ed2k, &response, watched).await?;
            Ok(CommandOutcome::Completed)
        }
        other => Ok(CommandOutcome::from_udp(other)),
    }
}

pub(super) async fn update_file_status(
    ctx: &CommandContext,
    size: u64,
    ed2k: &str,
    watched: bool,
) -> Result<CommandOutcome> {
    match ctx.client.send(UdpRequest::mylist_edit(size, ed2k, watched)).await {
        UdpOutcome::Success(response) => {
            save_entry(ctx, ed2k, &response, watched).await?;
            Ok(CommandOutcome::Completed)
        }
        UdpOutcome::NoSuchEntity(response) if response.code == NO_SUCH_MYLIST_ENTRY => {
            info!("{ed2k} is not in MyList yet, adding it");
            ctx.enqueue(CommandKind::AddFileToMyList {
                size,
                ed2k: ed2k.to_string(),
                watched,
            })
            .await?;
            Ok(CommandOutcome::Completed)
        }
        other => Ok(CommandOutcome::from_udp(other)),
    }
}

pub(super) async fn delete_file(
    ctx: &CommandContext,
    size: u64,
    ed2k: &str,
) -> Result<CommandOutcome> {
    match ctx.client.send(UdpRequest::mylist_del(size, ed2k)).await {
        UdpOutcome::Success(_) => {}
        UdpOutcome::NoSuchEntity(response) if response.code == NO_SUCH_MYLIST_ENTRY => {
            info!("{ed2k} was not in MyList");
        }
        other => return Ok(CommandOutcome::from_udp(other)),
    }
    ctx.records.delete(RecordKind::MyList, ed2k).await?;
    Ok(CommandOutcome::Completed)
}
