//! Star-topology process group over TCP.
//!
//! Rank 0 listens; every other rank connects and announces its rank. Frames
//! are length-prefixed:
//!
//! ```text
//! [8 bytes: element count (LE)] [count * 4 bytes: f32 payload]
//! ```
//!
//! Reductions are gathered on rank 0, summed in rank order and sent back, so
//! every rank ends up with bit-identical results.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::group::ProcessGroup;
use crate::{Error, Result};

/// Largest accepted frame: 1 G elements.
const MAX_FRAME_ELEMENTS: u64 = 1 << 30;

const RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Process group connected through rank 0
#[derive(Debug)]
pub struct TcpGroup {
    rank: usize,
    world_size: usize,
    /// On rank 0: one stream per peer, indexed by `rank - 1`.
    /// Elsewhere: the single stream to rank 0.
    streams: Vec<TcpStream>,
}

impl TcpGroup {
    /// Listen (rank 0) or connect (other ranks) at `address`
    pub fn connect(rank: usize, world_size: usize, address: &str, timeout: Duration) -> Result<Self> {
        if rank == 0 {
            let listener = TcpListener::bind(address)?;
            Self::root(listener, world_size)
        } else {
            Self::peer(rank, world_size, address, timeout)
        }
    }

    /// Accept `world_size - 1` peers on an already bound listener
    pub fn root(listener: TcpListener, world_size: usize) -> Result<Self> {
        let mut slots: Vec<Option<TcpStream>> = (1..world_size).map(|_| None).collect();
        for _ in 1..world_size {
            let (mut stream, peer) = listener.accept()?;
            stream.set_nodelay(true)?;
            let mut header = [0u8; 8];
            stream.read_exact(&mut header)?;
            let peer_rank = u64::from_le_bytes(header) as usize;
            debug!("rank {peer_rank} joined from {peer}");

            let slot = peer_rank
                .checked_sub(1)
                .and_then(|i| slots.get_mut(i))
                .ok_or_else(|| {
                    Error::Distributed(format!(
                        "peer announced rank {peer_rank} outside world size {world_size}"
                    ))
                })?;
            if slot.replace(stream).is_some() {
                return Err(Error::Distributed(format!("rank {peer_rank} joined twice")));
            }
        }
        let streams = slots.into_iter().flatten().collect();
        Ok(Self {
            rank: 0,
            world_size,
            streams,
        })
    }

    /// Connect to rank 0, retrying until `timeout` elapses
    pub fn peer(rank: usize, world_size: usize, address: &str, timeout: Duration) -> Result<Self> {
        let deadline = Instant::now() + timeout;
        let mut stream = loop {
            match TcpStream::connect(address) {
                Ok(stream) => break stream,
                Err(e) if Instant::now() < deadline => {
                    debug!("rank {rank} waiting for {address}: {e}");
                    thread::sleep(RETRY_INTERVAL);
                }
                Err(e) => {
                    warn!("rank {rank} gave up connecting to {address}");
                    return Err(Error::Distributed(format!(
                        "could not reach rank 0 at {address}: {e}"
                    )));
                }
            }
        };
        stream.set_nodelay(true)?;
        stream.write_all(&(rank as u64).to_le_bytes())?;
        Ok(Self {
            rank,
            world_size,
            streams: vec![stream],
        })
    }
}

fn send_frame(stream: &mut TcpStream, data: &[f32]) -> Result<()> {
    stream.write_all(&(data.len() as u64).to_le_bytes())?;
    stream.write_all(bytemuck::cast_slice(data))?;
    Ok(())
}

fn recv_frame(stream: &mut TcpStream) -> Result<Vec<f32>> {
    let mut header = [0u8; 8];
    stream.read_exact(&mut header)?;
    let len = u64::from_le_bytes(header);
    if len > MAX_FRAME_ELEMENTS {
        return Err(Error::Distributed(format!("frame of {len} elements is too large")));
    }
    let mut payload = vec![0f32; len as usize];
    stream.read_exact(bytemuck::cast_slice_mut(&mut payload))?;
    Ok(payload)
}

fn check_len(expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::Distributed(format!(
            "collective size mismatch: expected {expected} elements, got {actual}"
        )))
    }
}

impl ProcessGroup for TcpGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn all_reduce_sum(&mut self, data: &mut [f32]) -> Result<()> {
        if self.rank == 0 {
            for stream in &mut self.streams {
                let contribution = recv_frame(stream)?;
                check_len(data.len(), contribution.len())?;
                data.iter_mut().zip(&contribution).for_each(|(d, c)| *d += c);
            }
            for stream in &mut self.streams {
                send_frame(stream, data)?;
            }
        } else {
            let stream = &mut self.streams[0];
            send_frame(stream, data)?;
            let reduced = recv_frame(stream)?;
            check_len(data.len(), reduced.len())?;
            data.copy_from_slice(&reduced);
        }
        Ok(())
    }

    fn broadcast(&mut self, data: &mut Vec<f32>) -> Result<()> {
        if self.rank == 0 {
            for stream in &mut self.streams {
                send_frame(stream, data)?;
            }
        } else {
            *data = recv_frame(&mut self.streams[0])?;
        }
        Ok(())
    }
}
