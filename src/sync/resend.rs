use serde::Deserialize;
use tracing::{debug, warn};

use super::SyncCoordinator;
use crate::{
    errors::SyncError,
    objects::{Bytes32, WalletAction},
    rpc::{domain::OutboundMessage, with_timeout, PeerLink, PeerRequest},
    store::StoreError,
};

/// Name of the pending action that asks full nodes for a puzzle solution.
const REQUEST_PUZZLE_SOLUTION: &str = "request_puzzle_solution";

#[derive(Deserialize)]
struct ActionEnvelope {
    data: ActionData,
}

#[derive(Deserialize)]
struct ActionData {
    action_data: PuzzleSolutionAction,
}

#[derive(Deserialize)]
struct PuzzleSolutionAction {
    coin_name: String,
    height: u32,
}

/// A transaction that still has to reach some peers.
struct PendingTransaction {
    message: OutboundMessage,
    /// Peers that already accepted the transaction.
    accepted_by: Vec<Bytes32>,
}

impl SyncCoordinator {
    // RESEND
    // --------------------------------------------------------------------------------------------

    /// Sends unconfirmed transactions and pending protocol actions to every full node.
    ///
    /// Transactions are skipped for peers that already accepted them. Sending is best effort: a
    /// peer that fails to take a message is logged and skipped.
    pub async fn resend_queue(&self) -> Result<(), SyncError> {
        if self.is_shut_down() {
            return Ok(());
        }

        for pending in self.messages_to_resend().await? {
            if self.is_shut_down() {
                return Ok(());
            }
            for peer in self.connections.full_node_peers() {
                if pending.accepted_by.contains(&peer.peer_node_id()) {
                    continue;
                }
                self.send(peer.as_ref(), pending.message.clone()).await;
            }
        }

        for message in self.action_messages().await? {
            if self.is_shut_down() {
                return Ok(());
            }
            for peer in self.connections.full_node_peers() {
                self.send(peer.as_ref(), message.clone()).await;
            }
        }
        Ok(())
    }

    /// Sends `peer` every unconfirmed transaction it has not accepted yet.
    pub(crate) async fn resend_to_peer(&self, peer: &dyn PeerLink) -> Result<(), SyncError> {
        let node_id = peer.peer_node_id();
        for pending in self.messages_to_resend().await? {
            if !pending.accepted_by.contains(&node_id) {
                self.send(peer, pending.message).await;
            }
        }
        Ok(())
    }

    async fn messages_to_resend(&self) -> Result<Vec<PendingTransaction>, SyncError> {
        let transactions = self.store.get_not_sent_transactions().await?;
        Ok(transactions
            .into_iter()
            .filter_map(|transaction| {
                let accepted_by = transaction
                    .sent_to
                    .iter()
                    .filter(|(peer, ..)| transaction.accepted_by(peer))
                    .map(|(peer, ..)| *peer)
                    .collect();
                let spend_bundle = transaction.spend_bundle?;
                Some(PendingTransaction {
                    message: OutboundMessage::SendTransaction {
                        transaction_id: transaction.name,
                        spend_bundle,
                    },
                    accepted_by,
                })
            })
            .collect())
    }

    async fn action_messages(&self) -> Result<Vec<OutboundMessage>, SyncError> {
        let mut messages = Vec::new();
        for action in self.store.get_pending_actions().await? {
            if action.name != REQUEST_PUZZLE_SOLUTION {
                continue;
            }
            match parse_puzzle_solution_action(&action) {
                Ok(message) => messages.push(message),
                Err(err) => warn!(action_id = action.id, "skipping malformed action: {err}"),
            }
        }
        Ok(messages)
    }

    async fn send(&self, peer: &dyn PeerLink, message: OutboundMessage) {
        let result =
            with_timeout(PeerRequest::SendMessage, self.request_timeout(), peer.send_message(message)).await;
        match result {
            Ok(()) => debug!(peer = %peer.peer_node_id(), "resent pending message"),
            Err(err) => warn!(peer = %peer.peer_node_id(), "failed to resend message: {err}"),
        }
    }
}

fn parse_puzzle_solution_action(action: &WalletAction) -> Result<OutboundMessage, StoreError> {
    let envelope: ActionEnvelope = serde_json::from_str(&action.data)?;
    let action_data = envelope.data.action_data;
    let coin_name = Bytes32::from_hex(&action_data.coin_name)
        .map_err(|err| StoreError::ParsingError(format!("action {}: {err}", action.id)))?;
    Ok(OutboundMessage::RequestPuzzleSolution { coin_name, height: action_data.height })
}
