/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Thread that receives events emitted by the worker and sync server threads and passes them to
//! event handlers.
//!
//! For every event type a node holds up to two handlers: the user-defined one registered while
//! building the replica, and the default CSV logging handler from [logging](crate::logging),
//! registered when logging is enabled in the configuration. When neither exists for any event,
//! the thread is not started at all.

use std::{
    sync::mpsc::{Receiver, TryRecvError},
    thread,
    thread::JoinHandle,
};

use crate::{events::*, logging::Logger};

/// Pointer to a handler closure, parametrised by the event type.
pub type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

/// The two optional handlers enabled for one event type.
pub(crate) struct HandlerPair<T: Logger> {
    user_defined_handler: Option<HandlerPtr<T>>,
    logging_handler: Option<HandlerPtr<T>>,
}

impl<T: Logger> HandlerPair<T> {
    fn new(log: bool, user_defined_handler: Option<HandlerPtr<T>>) -> HandlerPair<T> {
        HandlerPair {
            user_defined_handler,
            logging_handler: if log { Some(T::get_logger()) } else { None },
        }
    }

    fn is_empty(&self) -> bool {
        self.user_defined_handler.is_none() && self.logging_handler.is_none()
    }

    fn fire(&self, event: &T) {
        self.user_defined_handler.iter().for_each(|handler| handler(event));
        self.logging_handler.iter().for_each(|handler| handler(event));
    }
}

/// The `HandlerPair`s for every pre-defined event type.
pub(crate) struct EventHandlers {
    pub(crate) start_height_handlers: HandlerPair<StartHeightEvent>,
    pub(crate) commit_randomness_handlers: HandlerPair<CommitRandomnessEvent>,
    pub(crate) reveal_randomness_handlers: HandlerPair<RevealRandomnessEvent>,
    pub(crate) propose_handlers: HandlerPair<ProposeEvent>,
    pub(crate) receive_proposal_handlers: HandlerPair<ReceiveProposalEvent>,
    pub(crate) co_sign_handlers: HandlerPair<CoSignEvent>,
    pub(crate) collect_co_signatures_handlers: HandlerPair<CollectCoSignaturesEvent>,
    pub(crate) broadcast_block_handlers: HandlerPair<BroadcastBlockEvent>,
    pub(crate) producer_timeout_handlers: HandlerPair<ProducerTimeoutEvent>,
    pub(crate) admit_transaction_handlers: HandlerPair<AdmitTransactionEvent>,
    pub(crate) apply_block_handlers: HandlerPair<ApplyBlockEvent>,
    pub(crate) update_validator_set_handlers: HandlerPair<UpdateValidatorSetEvent>,
    pub(crate) start_sync_handlers: HandlerPair<StartSyncEvent>,
    pub(crate) end_sync_handlers: HandlerPair<EndSyncEvent>,
    pub(crate) receive_sync_request_handlers: HandlerPair<ReceiveSyncRequestEvent>,
    pub(crate) send_sync_response_handlers: HandlerPair<SendSyncResponseEvent>,
}

impl EventHandlers {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        log: bool,
        start_height_handler: Option<HandlerPtr<StartHeightEvent>>,
        commit_randomness_handler: Option<HandlerPtr<CommitRandomnessEvent>>,
        reveal_randomness_handler: Option<HandlerPtr<RevealRandomnessEvent>>,
        propose_handler: Option<HandlerPtr<ProposeEvent>>,
        receive_proposal_handler: Option<HandlerPtr<ReceiveProposalEvent>>,
        co_sign_handler: Option<HandlerPtr<CoSignEvent>>,
        collect_co_signatures_handler: Option<HandlerPtr<CollectCoSignaturesEvent>>,
        broadcast_block_handler: Option<HandlerPtr<BroadcastBlockEvent>>,
        producer_timeout_handler: Option<HandlerPtr<ProducerTimeoutEvent>>,
        admit_transaction_handler: Option<HandlerPtr<AdmitTransactionEvent>>,
        apply_block_handler: Option<HandlerPtr<ApplyBlockEvent>>,
        update_validator_set_handler: Option<HandlerPtr<UpdateValidatorSetEvent>>,
        start_sync_handler: Option<HandlerPtr<StartSyncEvent>>,
        end_sync_handler: Option<HandlerPtr<EndSyncEvent>>,
        receive_sync_request_handler: Option<HandlerPtr<ReceiveSyncRequestEvent>>,
        send_sync_response_handler: Option<HandlerPtr<SendSyncResponseEvent>>,
    ) -> EventHandlers {
        EventHandlers {
            start_height_handlers: HandlerPair::new(log, start_height_handler),
            commit_randomness_handlers: HandlerPair::new(log, commit_randomness_handler),
            reveal_randomness_handlers: HandlerPair::new(log, reveal_randomness_handler),
            propose_handlers: HandlerPair::new(log, propose_handler),
            receive_proposal_handlers: HandlerPair::new(log, receive_proposal_handler),
            co_sign_handlers: HandlerPair::new(log, co_sign_handler),
            collect_co_signatures_handlers: HandlerPair::new(log, collect_co_signatures_handler),
            broadcast_block_handlers: HandlerPair::new(log, broadcast_block_handler),
            producer_timeout_handlers: HandlerPair::new(log, producer_timeout_handler),
            admit_transaction_handlers: HandlerPair::new(log, admit_transaction_handler),
            apply_block_handlers: HandlerPair::new(log, apply_block_handler),
            update_validator_set_handlers: HandlerPair::new(log, update_validator_set_handler),
            start_sync_handlers: HandlerPair::new(log, start_sync_handler),
            end_sync_handlers: HandlerPair::new(log, end_sync_handler),
            receive_sync_request_handlers: HandlerPair::new(log, receive_sync_request_handler),
            send_sync_response_handlers: HandlerPair::new(log, send_sync_response_handler),
        }
    }

    /// Checks whether no handlers at all are defined, in which case the event bus need not run.
    pub(crate) fn is_empty(&self) -> bool {
        self.start_height_handlers.is_empty()
            && self.commit_randomness_handlers.is_empty()
            && self.reveal_randomness_handlers.is_empty()
            && self.propose_handlers.is_empty()
            && self.receive_proposal_handlers.is_empty()
            && self.co_sign_handlers.is_empty()
            && self.collect_co_signatures_handlers.is_empty()
            && self.broadcast_block_handlers.is_empty()
            && self.producer_timeout_handlers.is_empty()
            && self.admit_transaction_handlers.is_empty()
            && self.apply_block_handlers.is_empty()
            && self.update_validator_set_handlers.is_empty()
            && self.start_sync_handlers.is_empty()
            && self.end_sync_handlers.is_empty()
            && self.receive_sync_request_handlers.is_empty()
            && self.send_sync_response_handlers.is_empty()
    }

    /// Triggers the execution of the handlers defined for a given event.
    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::StartHeight(event) => self.start_height_handlers.fire(&event),
            Event::CommitRandomness(event) => self.commit_randomness_handlers.fire(&event),
            Event::RevealRandomness(event) => self.reveal_randomness_handlers.fire(&event),
            Event::Propose(event) => self.propose_handlers.fire(&event),
            Event::ReceiveProposal(event) => self.receive_proposal_handlers.fire(&event),
            Event::CoSign(event) => self.co_sign_handlers.fire(&event),
            Event::CollectCoSignatures(event) => self.collect_co_signatures_handlers.fire(&event),
            Event::BroadcastBlock(event) => self.broadcast_block_handlers.fire(&event),
            Event::ProducerTimeout(event) => self.producer_timeout_handlers.fire(&event),
            Event::AdmitTransaction(event) => self.admit_transaction_handlers.fire(&event),
            Event::ApplyBlock(event) => self.apply_block_handlers.fire(&event),
            Event::UpdateValidatorSet(event) => self.update_validator_set_handlers.fire(&event),
            Event::StartSync(event) => self.start_sync_handlers.fire(&event),
            Event::EndSync(event) => self.end_sync_handlers.fire(&event),
            Event::ReceiveSyncRequest(event) => self.receive_sync_request_handlers.fire(&event),
            Event::SendSyncResponse(event) => self.send_sync_response_handlers.fire(&event),
        }
    }
}

/// Starts the event bus thread: an infinite loop that fires handlers for received events until a
/// shutdown signal arrives from the parent thread.
pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("event_bus thread disconnected from main thread")
            }
        }

        match event_subscriber.try_recv() {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(TryRecvError::Empty) => thread::yield_now(),
            Err(TryRecvError::Disconnected) => {
                panic!("The worker thread (event publisher) disconnected from the channel")
            }
        }
    })
}
