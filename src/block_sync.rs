/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Block sync: serving chain data to lagging peers, and fetching missed blocks from them.
//!
//! The sync server is its own thread: it answers `Ping`s, `RequestNodes` and `RequestBlock`s
//! using read access to the block store, without ever touching the consensus loop. The sync
//! client is driven by the worker loop whenever it notices (through a block arriving with a
//! height gap) that it fell behind; fetched blocks go through exactly the same validation and
//! application path as broadcast blocks.

use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use crate::events::{Event, ReceiveSyncRequestEvent, SendSyncResponseEvent};
use crate::messages::{Message, RequestId};
use crate::networking::{Network, SenderHandle};
use crate::state::block_store::BlockStore;
use crate::state::kv_store::KVStore;
use crate::types::basic::BlockHeight;
use crate::types::block::Block;
use crate::types::bytes::Address;

/// Spawn the sync server thread.
pub(crate) fn start_sync_server<K: KVStore, N: Network>(
    block_store: Arc<RwLock<BlockStore<K>>>,
    mut network: N,
    requests: Receiver<(Address, Message)>,
    shutdown_signal: Receiver<()>,
    event_publisher: Option<Sender<Event>>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("Sync server thread disconnected from main thread")
            }
        }

        match requests.try_recv() {
            Ok((origin, Message::Ping(request_id))) => {
                network.send(origin, Message::Pong(request_id));
            }
            Ok((origin, Message::RequestNodes(request_id))) => {
                // Peer discovery belongs to the networking provider; answer with what we know,
                // which is nothing.
                network.send(origin, Message::AnswerNodes(request_id, Vec::new()));
            }
            Ok((origin, Message::RequestBlock(request_id, height))) => {
                Event::ReceiveSyncRequest(ReceiveSyncRequestEvent {
                    timestamp: SystemTime::now(),
                    peer: origin,
                    height: BlockHeight::new(height),
                })
                .publish(&event_publisher);

                let block = block_store
                    .write()
                    .unwrap()
                    .block_by_height(BlockHeight::new(height))
                    .ok()
                    .flatten();
                let answer = block.as_ref().map(|b| b.to_rlp());
                Event::SendSyncResponse(SendSyncResponseEvent {
                    timestamp: SystemTime::now(),
                    peer: origin,
                    height: BlockHeight::new(height),
                    found: answer.is_some(),
                })
                .publish(&event_publisher);
                network.send(origin, Message::AnswerBlock(request_id, answer));
            }
            Ok(_) => (),
            Err(TryRecvError::Empty) => thread::yield_now(),
            Err(TryRecvError::Disconnected) => {
                panic!("Sync server thread disconnected from the poller")
            }
        }
    })
}

/// Client side of block sync: request one block at a time from a peer and wait for the matching
/// answer.
pub(crate) struct BlockSyncClient<N: Network> {
    sender: SenderHandle<N>,
    answers: Receiver<(Address, Message)>,
    response_timeout: Duration,
}

impl<N: Network> BlockSyncClient<N> {
    pub(crate) fn new(
        network: N,
        answers: Receiver<(Address, Message)>,
        response_timeout: Duration,
    ) -> BlockSyncClient<N> {
        BlockSyncClient {
            sender: SenderHandle::new(network),
            answers,
            response_timeout,
        }
    }

    /// Ask `peer` for the block at `height`. `Ok(None)` means the peer answered that it does
    /// not have the block; an error means it did not answer in time.
    pub(crate) fn fetch_block(
        &mut self,
        peer: Address,
        height: BlockHeight,
    ) -> Result<Option<Block>, BlockFetchError> {
        let request_id = RequestId::random();
        self.sender
            .send(peer, Message::RequestBlock(request_id, height.int()));

        let deadline = Instant::now() + self.response_timeout;
        while Instant::now() < deadline {
            match self.answers.recv_timeout(deadline - Instant::now()) {
                Ok((origin, Message::AnswerBlock(answer_id, answer))) => {
                    if origin != peer || answer_id != request_id {
                        continue;
                    }
                    return match answer {
                        Some(encoded) => Block::from_rlp(&encoded)
                            .map(Some)
                            .map_err(|_| BlockFetchError::MalformedAnswer),
                        None => Ok(None),
                    };
                }
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => return Err(BlockFetchError::Disconnected),
            }
        }
        Err(BlockFetchError::Timeout)
    }
}

#[derive(Debug)]
pub(crate) enum BlockFetchError {
    Timeout,
    Disconnected,
    MalformedAnswer,
}
