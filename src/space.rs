//! Per-client multiplexer and command dispatcher.

use std::{
    collections::{hash_map::Entry, HashMap},
    io, string,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc, Mutex, Weak,
    },
};

use async_recursion::async_recursion;
use async_trait::async_trait;
use derive_more::{Display, From};
use orchid_buffer::{Beam, Buffer, TakeError, Window};

use crate::{
    node::Back,
    output::Output,
    pipe::{Drain, Pipe, PipeError},
    prelude::*,
    proto::Tag,
    rtc::{sdp, Outgoing, RespondError, RtcError},
};

/// Failures of a single command dispatch.
///
/// Every variant except [`CallError::Unknown`] is recoverable: the outer
/// dispatcher wraps it as a `ZERO ‖ nonce ‖ message` reply and the space
/// lives on. An unknown command means the session is garbage and tears the
/// space down.
#[derive(Debug, Display, From)]
pub enum CallError {
    /// Framing consumed past the end of the frame, or left bytes over.
    #[display(fmt = "{}", _0)]
    Take(TakeError),

    /// No output or outgoing is registered under the tag.
    #[display(fmt = "no such entry: {}", _0)]
    #[from(ignore)]
    Missing(Tag),

    /// The tag is already taken by a live output.
    #[display(fmt = "tag already in use: {}", _0)]
    #[from(ignore)]
    Occupied(Tag),

    /// The referenced output does not wrap a data channel.
    #[display(fmt = "output {} is not a channel", _0)]
    #[from(ignore)]
    NotChannel(Tag),

    /// A textual argument was not UTF-8.
    #[display(fmt = "malformed argument: {}", _0)]
    Utf8(string::FromUtf8Error),

    /// Socket setup failed.
    #[display(fmt = "socket failed: {}", _0)]
    Io(io::Error),

    /// An outgoing connection could not be driven.
    #[display(fmt = "{}", _0)]
    Rtc(RtcError),

    /// The inner forwarder rejected the operation.
    #[display(fmt = "{}", _0)]
    Pipe(PipeError),

    /// The signaling responder could not answer a relayed offer.
    #[display(fmt = "{}", _0)]
    Respond(RespondError),

    /// The command tag names no command; fatal to the space.
    #[display(fmt = "unknown command: {}", _0)]
    #[from(ignore)]
    Unknown(Tag),
}

impl CallError {
    /// Whether this failure tears the space down instead of being wrapped
    /// into an error reply.
    fn is_fatal(&self) -> bool {
        matches!(self, CallError::Unknown(_))
    }
}

/// Per-client multiplexer: owns the tagged outputs and outgoing connections
/// a session has opened, interprets command frames, and keeps the advisory
/// balance the client is billed against.
///
/// A space is a pipe toward its currently attached conduit and a drain from
/// its outputs; the conduit drives [`Space::call`] for every inbound frame,
/// serialized in arrival order.
pub struct Space {
    back: Arc<dyn Back>,
    ices: Vec<String>,
    input: Mutex<Option<Weak<dyn Pipe>>>,
    outputs: Mutex<HashMap<Tag, Arc<Output>>>,
    outgoing: Mutex<HashMap<Tag, Arc<Outgoing>>>,
    balance: AtomicI64,
    self_: Weak<Space>,
}

impl Space {
    /// Creates a detached space answering relayed offers through `back` and
    /// advertising `ices` on the outgoing connections it establishes.
    pub fn new(back: Arc<dyn Back>, ices: Vec<String>) -> Arc<Space> {
        Arc::new_cyclic(|self_| Space {
            back,
            ices,
            input: Mutex::new(None),
            outputs: Mutex::new(HashMap::new()),
            outgoing: Mutex::new(HashMap::new()),
            balance: AtomicI64::new(0),
            self_: self_.clone(),
        })
    }

    /// Attaches `input` as the conduit replies and landings are sent into.
    pub fn associate(&self, input: &Arc<dyn Pipe>) {
        *self.input.lock().unwrap() = Some(Arc::downgrade(input));
    }

    /// Detaches `input` if it is still the attached conduit.
    pub fn dissociate(&self, input: &Arc<dyn Pipe>) {
        let mut current = self.input.lock().unwrap();
        let detached = match &*current {
            Some(attached) => attached.ptr_eq(&Arc::downgrade(input)),
            None => false,
        };
        if detached {
            *current = None;
        }
    }

    /// Subtracts `amount` from the advisory balance. The balance may go
    /// negative; nothing in the gateway enforces a ceiling.
    pub fn bill(&self, amount: u64) {
        let _ = self.balance.fetch_sub(amount as i64, Ordering::Relaxed);
    }

    /// The current advisory balance.
    pub fn balance(&self) -> i64 {
        self.balance.load(Ordering::Relaxed)
    }

    /// Removes the output registered under `tag`, if any.
    pub fn unplug(&self, tag: &Tag) -> Option<Arc<Output>> {
        self.outputs.lock().unwrap().remove(tag)
    }

    /// Dispatches one inbound frame: `nonce(32) ‖ body`.
    ///
    /// A nonce matching a live output routes the body to that output as
    /// data; outputs shadow commands. Anything else is a command whose
    /// reply (or wrapped error) is sent back under the nonce.
    pub async fn call(&self, frame: Beam) {
        self.bill(1);

        let mut window = Window::new(&frame);
        let nonce = match window.take::<32>() {
            Ok(block) => Tag::from(block),
            Err(error) => {
                error!("malformed frame: {}", error);
                self.collapse().await;
                return;
            }
        };

        let output = self.outputs.lock().unwrap().get(&nonce).cloned();
        if let Some(output) = output {
            self.bill(1);
            if let Err(error) = output.send(&window).await {
                warn!("output {} rejected a send: {}", nonce, error);
                if let Some(output) = self.unplug(&nonce) {
                    let _ = output.shut().await;
                }
            }
            return;
        }

        let result = match self.invoke(&mut window).await {
            Ok(None) => {
                // a swallowed frame leaves no reply and no framing residue
                return;
            }
            Ok(Some(reply)) => {
                window.finish().map(|_| reply).map_err(CallError::from)
            }
            Err(error) => Err(error),
        };

        match result {
            Ok(reply) => {
                if let Err(error) =
                    self.send(&(nonce, reply.as_slice())).await
                {
                    trace!("reply to {} undeliverable: {}", nonce, error);
                }
            }
            Err(error) if error.is_fatal() => {
                error!("session fault: {}", error);
                self.collapse().await;
            }
            Err(error) => {
                debug!("command {} failed: {}", nonce, error);
                let message = error.to_string();
                if let Err(error) = self
                    .send(&(Tag::ZERO, nonce, message.as_str()))
                    .await
                {
                    trace!("error reply to {} undeliverable: {}", nonce, error);
                }
            }
        }
    }

    /// Interprets `command_tag(32) ‖ args`, consuming exactly the command's
    /// arguments from `window` and returning the reply payload. `None` means
    /// the frame was swallowed and no reply of any kind goes out.
    #[async_recursion]
    async fn invoke<'frame>(
        &self,
        window: &mut Window<'frame>,
    ) -> Result<Option<Vec<u8>>, CallError> {
        let command = Tag::from(window.take::<32>()?);
        match command {
            Tag::BATCH => {
                // sub-frames are dispatched sequentially so their replies
                // concatenate in issue order
                let mut builder = Vec::new();
                while !window.is_empty() {
                    let _nonce = Tag::from(window.take::<32>()?);
                    if let Some(reply) = self.invoke(window).await? {
                        builder.extend_from_slice(&reply);
                    }
                }
                Ok(Some(builder))
            }

            Tag::DISCARD => Ok(None),

            Tag::CLOSE => {
                let tag = Tag::from(window.take::<32>()?);
                let output =
                    self.unplug(&tag).ok_or(CallError::Missing(tag))?;
                output.shut().await?;
                Ok(Some(Vec::new()))
            }

            Tag::CONNECT => {
                let tag = Tag::from(window.take::<32>()?);
                let target =
                    String::from_utf8(window.take_rest().to_vec())?;
                let (output, endpoint) =
                    Output::connect(self.self_.clone(), tag, &target)
                        .await?;
                match self.outputs.lock().unwrap().entry(tag) {
                    Entry::Occupied(_) => {
                        return Err(CallError::Occupied(tag));
                    }
                    Entry::Vacant(slot) => {
                        let _ = slot.insert(Arc::new(output));
                    }
                }
                Ok(Some(endpoint.to_string().into_bytes()))
            }

            Tag::ESTABLISH => {
                let handle = Tag::from(window.take::<32>()?);
                let outgoing = Outgoing::new(&self.ices).await?;
                let _ = self
                    .outgoing
                    .lock()
                    .unwrap()
                    .insert(handle, Arc::new(outgoing));
                Ok(Some(Vec::new()))
            }

            Tag::OFFER => {
                let handle = Tag::from(window.take::<32>()?);
                let outgoing = self.outgoing(&handle)?;
                let offer = outgoing.offer().await.map_err(CallError::Rtc)?;
                Ok(Some(sdp::strip(&offer).into_bytes()))
            }

            Tag::NEGOTIATE => {
                let handle = Tag::from(window.take::<32>()?);
                let answer =
                    String::from_utf8(window.take_rest().to_vec())?;
                let outgoing = self.outgoing(&handle)?;
                outgoing.negotiate(answer).await.map_err(CallError::Rtc)?;
                Ok(Some(Vec::new()))
            }

            Tag::CHANNEL => {
                let handle = Tag::from(window.take::<32>()?);
                let tag = Tag::from(window.take::<32>()?);
                let outgoing = self.outgoing(&handle)?;
                let channel = outgoing
                    .channel(&tag.to_string())
                    .await
                    .map_err(CallError::Rtc)?;
                let output = Output::channel(self.self_.clone(), tag, channel);
                match self.outputs.lock().unwrap().entry(tag) {
                    Entry::Occupied(_) => {
                        return Err(CallError::Occupied(tag));
                    }
                    Entry::Vacant(slot) => {
                        let _ = slot.insert(Arc::new(output));
                    }
                }
                Ok(Some(Vec::new()))
            }

            Tag::CANCEL => {
                let handle = Tag::from(window.take::<32>()?);
                let _ = self.outgoing.lock().unwrap().remove(&handle);
                Ok(Some(Vec::new()))
            }

            Tag::FINISH => {
                let tag = Tag::from(window.take::<32>()?);
                let output = self
                    .outputs
                    .lock()
                    .unwrap()
                    .get(&tag)
                    .cloned()
                    .ok_or(CallError::Missing(tag))?;
                let mut ready =
                    output.ready().ok_or(CallError::NotChannel(tag))?;
                while !*ready.borrow() {
                    ready
                        .changed()
                        .await
                        .map_err(|_| CallError::Pipe(PipeError::Detached))?;
                }
                Ok(Some(Vec::new()))
            }

            Tag::ANSWER => {
                let offer =
                    String::from_utf8(window.take_rest().to_vec())?;
                let answer = self.back.respond(&offer).await?;
                Ok(Some(answer.into_bytes()))
            }

            unknown => Err(CallError::Unknown(unknown)),
        }
    }

    fn outgoing(&self, handle: &Tag) -> Result<Arc<Outgoing>, CallError> {
        self.outgoing
            .lock()
            .unwrap()
            .get(handle)
            .cloned()
            .ok_or(CallError::Missing(*handle))
    }

    /// Tears the whole space down after a fatal fault: outputs, outgoings,
    /// and the attached conduit.
    async fn collapse(&self) {
        let _ = self.shut().await;
        self.outgoing.lock().unwrap().clear();
        let input = self.input.lock().unwrap().clone();
        if let Some(input) = input.and_then(|input| input.upgrade()) {
            let _ = input.shut().await;
        }
    }
}

#[async_trait]
impl Pipe for Space {
    /// Forwards `data` to the attached conduit, billing one unit.
    async fn send(&self, data: &(dyn Buffer + Sync)) -> Result<(), PipeError> {
        self.bill(1);
        let input = self.input.lock().unwrap().clone();
        match input.and_then(|input| input.upgrade()) {
            Some(input) => input.send(data).await,
            None => Err(PipeError::Detached),
        }
    }

    /// Cascades shutdown over every output, in iteration order.
    async fn shut(&self) -> Result<(), PipeError> {
        let outputs: Vec<Arc<Output>> =
            self.outputs.lock().unwrap().drain().map(|(_, v)| v).collect();
        for output in outputs {
            if let Err(error) = output.shut().await {
                trace!("output {} shut: {}", output.tag(), error);
            }
        }
        Ok(())
    }
}

impl Drain for Space {
    /// Landing from an output: deliver to the client in the background,
    /// never blocking the caller.
    fn land(&self, data: Beam) {
        if let Some(this) = self.self_.upgrade() {
            tokio::spawn(async move {
                if let Err(error) = this.send(&data).await {
                    trace!("landing undeliverable: {}", error);
                }
            });
        }
    }

    fn stop(&self, error: PipeError) {
        warn!("space transport failed: {}", error);
        if let Some(this) = self.self_.upgrade() {
            tokio::spawn(async move {
                this.collapse().await;
            });
        }
    }
}

impl Drop for Space {
    fn drop(&mut self) {
        trace!("space retired with balance {}", self.balance());
    }
}
