//! The receive loop: the only reader of channel-in.
//!
//! Frames are read and handled strictly in arrival order. Responses resolve a
//! pending call inline; requests run on their own task so a local method may
//! call back into the peer without stalling the loop.

use super::dispatch::{DisconnectReason, Invocation, Invoked, Method};
use super::protocol::{Frame, FrameReader, ReadOutcome};
use super::{LinkState, Shared};
use crate::codec::encode_value;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, warn};

/// Run until the link leaves the open state; hands channel-in back on exit.
pub(crate) async fn run(
    shared: Arc<Shared>,
    mut reader: FrameReader,
    mut stop_rx: watch::Receiver<bool>,
) -> FrameReader {
    debug!("Receive loop started for link {}", shared.name());

    loop {
        if *stop_rx.borrow() {
            break;
        }

        let outcome = tokio::select! {
            biased;
            _ = stop_rx.changed() => continue,
            outcome = reader.next_frame() => outcome,
        };

        match outcome {
            Ok(ReadOutcome::Frame(frame)) => handle_frame(&shared, frame),
            Ok(ReadOutcome::Skipped { reason }) => {
                warn!("Link {} skipped a frame: {}", shared.name(), reason);
            }
            Ok(ReadOutcome::Eof) => {
                shared.disconnect(DisconnectReason::RemoteClosed).await;
                break;
            }
            Err(e) => {
                if !shared.disconnect(DisconnectReason::ChannelError(e.to_string())).await {
                    debug!("Link {} read failed after close: {}", shared.name(), e);
                }
                break;
            }
        }
    }

    debug!("Receive loop stopped for link {}", shared.name());
    reader
}

fn handle_frame(shared: &Arc<Shared>, frame: Frame) {
    if frame.is_response() {
        resolve_response(shared, frame);
        return;
    }
    if frame.call_id <= 0 {
        warn!(
            "Link {} got call to {} with invalid id {}",
            shared.name(),
            frame.method,
            frame.call_id
        );
        return;
    }

    let Some(handler) = shared.handler() else {
        warn!(
            "Link {} has no local handler; dropping call {} to {}",
            shared.name(),
            frame.call_id,
            frame.method
        );
        return;
    };

    let Some(method) = handler.resolve(&frame.method, frame.args.len()).cloned() else {
        warn!(
            "Link {} has no local method {}/{}; ignoring call {}",
            shared.name(),
            frame.method,
            frame.args.len(),
            frame.call_id
        );
        return;
    };

    tokio::spawn(execute(shared.clone(), method, frame));
}

fn resolve_response(shared: &Shared, frame: Frame) {
    let Frame {
        call_id, mut args, ..
    } = frame;

    if args.len() != 1 {
        warn!(
            "Link {} got a response for call {} with {} payloads; expected 1",
            shared.name(),
            call_id,
            args.len()
        );
        return;
    }
    let Some(payload) = args.pop() else {
        return;
    };

    let (id, is_exception) = if call_id < 0 {
        match call_id.checked_neg() {
            Some(id) => (id, true),
            None => {
                warn!("Link {} got a response with invalid id {}", shared.name(), call_id);
                return;
            }
        }
    } else {
        (call_id, false)
    };

    shared.pending().resolve(id, payload, is_exception);
}

/// Invoke a local method and answer the caller unless the method is void.
async fn execute(shared: Arc<Shared>, method: Method, frame: Frame) {
    let Frame {
        method: name,
        call_id,
        args,
    } = frame;
    let codec = shared.codec();
    let call = Invocation::new(call_id, name.clone(), args, codec.clone());

    let result = match method.invoke(call).await {
        Invoked::Void(Ok(())) => return,
        Invoked::Void(Err(e)) => {
            warn!("Void call {} ({}) on link {} failed: {:#}", name, call_id, shared.name(), e);
            return;
        }
        Invoked::Reply(result) => result,
    };

    if shared.state() == LinkState::Transferred {
        debug!("Suppressing reply to call {} ({}); link was transferred", name, call_id);
        return;
    }

    let response = match result.and_then(|reply| Ok(reply.into_payload(codec.as_ref())?)) {
        Ok(payload) => Frame::response(call_id, payload),
        Err(e) => {
            let description = format!("{:#}", e);
            debug!("Call {} ({}) failed locally: {}", name, call_id, description);
            match encode_value(codec.as_ref(), &description) {
                Ok(payload) => Frame::exception(call_id, payload),
                Err(e) => {
                    error!("Could not encode failure of call {} ({}): {}", name, call_id, e);
                    return;
                }
            }
        }
    };

    if let Err(e) = shared.send(&response).await {
        debug!("Could not answer call {} ({}) on link {}: {}", name, call_id, shared.name(), e);
    }
}
