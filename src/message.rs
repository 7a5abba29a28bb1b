//! The IPMI message frame carried inside every session packet.
//!
//! Layout: `rsAddr, netFn<<2|rsLUN, checksum1, rqAddr, rqSeq<<2|rqLUN, cmd, data.., checksum2`.
//! Independent of the session protocol version.

use crate::codec::Reader;
use crate::error::{Error, Result};

/// BMC responder address.
pub const BMC_SLAVE_ADDR: u8 = 0x20;
/// Remote console software ID used as requester address.
pub const REMOTE_SWID: u8 = 0x81;

/// Shortest frame accepted: both addresses, netfn, checksum1, seq, cmd, completion code.
const MIN_FRAME_LEN: usize = 7;

/// 2's complement checksum: the covered bytes plus the checksum sum to zero modulo 256.
pub fn checksum(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    (!sum).wrapping_add(1)
}

fn verify_checksum(bytes: &[u8], provided: u8) -> bool {
    bytes
        .iter()
        .fold(provided, |acc, &b| acc.wrapping_add(b))
        == 0
}

/// An IPMI request frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpmiRequest {
    /// Responder slave address.
    pub rs_addr: u8,
    /// Network function (6 bits).
    pub net_fn: u8,
    /// Responder LUN (2 bits).
    pub rs_lun: u8,
    /// Requester address.
    pub rq_addr: u8,
    /// Requester sequence number (6 bits).
    pub rq_seq: u8,
    /// Requester LUN (2 bits).
    pub rq_lun: u8,
    /// Command number.
    pub cmd: u8,
    /// Command data.
    pub data: Vec<u8>,
}

impl IpmiRequest {
    /// A request addressed to the BMC from the remote console, LUN 0.
    pub fn new(net_fn: u8, cmd: u8, rq_seq: u8, data: Vec<u8>) -> Self {
        Self {
            rs_addr: BMC_SLAVE_ADDR,
            net_fn,
            rs_lun: 0,
            rq_addr: REMOTE_SWID,
            rq_seq,
            rq_lun: 0,
            cmd,
            data,
        }
    }

    /// Encode the frame, computing both checksums.
    pub fn pack(&self) -> Result<Vec<u8>> {
        if self.rq_seq > 0x3F {
            return Err(Error::InvalidArgument("rq_seq must be 6-bit"));
        }
        if self.net_fn > 0x3F {
            return Err(Error::InvalidArgument("netfn must be 6-bit"));
        }

        let mut msg = Vec::with_capacity(MIN_FRAME_LEN + self.data.len());
        msg.push(self.rs_addr);
        msg.push((self.net_fn << 2) | (self.rs_lun & 0x03));
        msg.push(checksum(&msg[0..2]));
        msg.push(self.rq_addr);
        msg.push((self.rq_seq << 2) | (self.rq_lun & 0x03));
        msg.push(self.cmd);
        msg.extend_from_slice(&self.data);
        let csum2 = checksum(&msg[3..]);
        msg.push(csum2);
        Ok(msg)
    }

    /// Decode a request frame, verifying both checksums.
    pub fn unpack(msg: &[u8]) -> Result<Self> {
        verify_frame(msg, MIN_FRAME_LEN)?;
        Ok(Self {
            rs_addr: msg[0],
            net_fn: msg[1] >> 2,
            rs_lun: msg[1] & 0x03,
            rq_addr: msg[3],
            rq_seq: msg[4] >> 2,
            rq_lun: msg[4] & 0x03,
            cmd: msg[5],
            data: msg[6..msg.len() - 1].to_vec(),
        })
    }
}

/// An IPMI response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpmiResponse {
    /// Requester address (the response's destination).
    pub rq_addr: u8,
    /// Network function (odd: request netfn + 1).
    pub net_fn: u8,
    /// Requester LUN.
    pub rq_lun: u8,
    /// Responder address.
    pub rs_addr: u8,
    /// Sequence number echoed from the request.
    pub rq_seq: u8,
    /// Responder LUN.
    pub rs_lun: u8,
    /// Command number.
    pub cmd: u8,
    /// Completion code.
    pub completion_code: u8,
    /// Response data after the completion code.
    pub data: Vec<u8>,
}

impl IpmiResponse {
    /// Encode the frame, computing both checksums.
    pub fn pack(&self) -> Vec<u8> {
        let mut msg = Vec::with_capacity(MIN_FRAME_LEN + 1 + self.data.len());
        msg.push(self.rq_addr);
        msg.push((self.net_fn << 2) | (self.rq_lun & 0x03));
        msg.push(checksum(&msg[0..2]));
        msg.push(self.rs_addr);
        msg.push((self.rq_seq << 2) | (self.rs_lun & 0x03));
        msg.push(self.cmd);
        msg.push(self.completion_code);
        msg.extend_from_slice(&self.data);
        let csum2 = checksum(&msg[3..]);
        msg.push(csum2);
        msg
    }

    /// Decode a response frame, verifying both checksums.
    pub fn unpack(msg: &[u8]) -> Result<Self> {
        verify_frame(msg, MIN_FRAME_LEN + 1)?;
        let mut r = Reader::new(&msg[..msg.len() - 1], "IPMI response too short");
        let rq_addr = r.u8()?;
        let net_fn_lun = r.u8()?;
        r.skip(1)?;
        let rs_addr = r.u8()?;
        let seq_lun = r.u8()?;
        let cmd = r.u8()?;
        let completion_code = r.u8()?;
        Ok(Self {
            rq_addr,
            net_fn: net_fn_lun >> 2,
            rq_lun: net_fn_lun & 0x03,
            rs_addr,
            rq_seq: seq_lun >> 2,
            rs_lun: seq_lun & 0x03,
            cmd,
            completion_code,
            data: r.rest().to_vec(),
        })
    }

    /// Check that this response answers `request`.
    pub(crate) fn check_answers(&self, request: &IpmiRequest) -> Result<()> {
        if self.net_fn != request.net_fn + 1 {
            return Err(Error::Protocol("unexpected response netfn"));
        }
        if self.rs_addr != request.rs_addr || self.rq_addr != request.rq_addr {
            return Err(Error::Protocol("unexpected responder or requester address"));
        }
        if self.rq_seq != request.rq_seq {
            return Err(Error::Protocol("unexpected request sequence"));
        }
        if self.cmd != request.cmd {
            return Err(Error::Protocol("unexpected command"));
        }
        Ok(())
    }
}

fn verify_frame(msg: &[u8], min_len: usize) -> Result<()> {
    if msg.len() < min_len {
        return Err(Error::Protocol("IPMI message too short"));
    }
    if !verify_checksum(&msg[0..2], msg[2]) {
        return Err(Error::Protocol("invalid IPMI checksum1"));
    }
    let last = msg.len() - 1;
    if !verify_checksum(&msg[3..last], msg[last]) {
        return Err(Error::Protocol("invalid IPMI checksum2"));
    }
    Ok(())
}
