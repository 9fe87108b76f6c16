// Copyright (c) 2026 Namechain
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! Zone rows to DNS wire answers.

use crate::core::types::{normalize_name, DnsRecord, RecordType};
use hickory_proto::op::{Message, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::rdata::{A, AAAA, CNAME, NS, PTR, TXT};
use hickory_proto::rr::{Name, RData, Record};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;
use thiserror::Error;

/// Answer construction errors.
#[derive(Debug, Error)]
pub enum AnswerError {
    /// RDATA text does not parse for the record type.
    #[error("bad rdata")]
    BadRdata,
    /// Name does not parse as a DNS name.
    #[error("bad name")]
    BadName,
}

/// Convert one zone row into a resource record.
pub fn record_to_rr(record: &DnsRecord) -> Result<Record, AnswerError> {
    let name = Name::from_ascii(&record.name_norm()).map_err(|_| AnswerError::BadName)?;
    let rdata = match record.rtype {
        RecordType::A => {
            let addr = Ipv4Addr::from_str(record.rdata.trim()).map_err(|_| AnswerError::BadRdata)?;
            RData::A(A(addr))
        }
        RecordType::Aaaa => {
            let addr = Ipv6Addr::from_str(record.rdata.trim()).map_err(|_| AnswerError::BadRdata)?;
            RData::AAAA(AAAA(addr))
        }
        RecordType::Txt => RData::TXT(TXT::new(vec![record.rdata.clone()])),
        RecordType::Cname => {
            let target =
                Name::from_ascii(&normalize_name(&record.rdata)).map_err(|_| AnswerError::BadRdata)?;
            RData::CNAME(CNAME(target))
        }
        RecordType::Ns => {
            let target =
                Name::from_ascii(&normalize_name(&record.rdata)).map_err(|_| AnswerError::BadRdata)?;
            RData::NS(NS(target))
        }
        RecordType::Ptr => {
            let target =
                Name::from_ascii(&normalize_name(&record.rdata)).map_err(|_| AnswerError::BadRdata)?;
            RData::PTR(PTR(target))
        }
    };
    Ok(Record::from_rdata(name, record.ttl, rdata))
}

fn response_skeleton(request: &Message) -> Message {
    let mut response = Message::new();
    response
        .set_id(request.id())
        .set_message_type(MessageType::Response)
        .set_op_code(OpCode::Query)
        .set_authoritative(true)
        .set_recursion_desired(request.recursion_desired())
        .set_recursion_available(false);
    for query in request.queries() {
        response.add_query(query.clone());
    }
    response
}

/// `AA=1 NOERROR` reply carrying one RR per zone match.
///
/// Rows whose RDATA no longer parses are skipped rather than failing the
/// whole reply.
pub fn authoritative_answer(request: &Message, records: &[DnsRecord]) -> Message {
    let mut response = response_skeleton(request);
    response.set_response_code(ResponseCode::NoError);
    for record in records {
        if let Ok(rr) = record_to_rr(record) {
            response.add_answer(rr);
        }
    }
    response
}

/// Authoritative negative reply (`NXDOMAIN`, `SERVFAIL`, `FORMERR`).
pub fn negative_answer(request: &Message, rcode: ResponseCode) -> Message {
    let mut response = response_skeleton(request);
    response.set_response_code(rcode);
    response
}

/// Header-only error reply for queries that did not parse past the id.
pub fn bare_error(id: u16, rcode: ResponseCode) -> Message {
    let mut response = Message::new();
    response
        .set_id(id)
        .set_message_type(MessageType::Response)
        .set_op_code(OpCode::Query)
        .set_response_code(rcode);
    response
}

/// Truncated variant of a reply: same header with `TC=1` and no answers.
pub fn truncated(request: &Message) -> Message {
    let mut response = response_skeleton(request);
    response.set_response_code(ResponseCode::NoError);
    response.set_truncated(true);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::Query;
    use hickory_proto::rr::RecordType as WireType;

    fn zone_record(rtype: RecordType, rdata: &str) -> DnsRecord {
        DnsRecord {
            name: "web.example.com.".to_string(),
            rtype,
            ttl: 300,
            rdata: rdata.to_string(),
            owner: "pk".to_string(),
            tx_hash: String::new(),
            timestamp: 0,
        }
    }

    fn request_for(qtype: WireType) -> Message {
        let mut request = Message::new();
        request.set_id(42);
        request.add_query(Query::query(Name::from_ascii("web.example.com.").unwrap(), qtype));
        request
    }

    #[test]
    fn a_record_converts_to_four_bytes() {
        let rr = record_to_rr(&zone_record(RecordType::A, "10.0.0.1")).unwrap();
        assert_eq!(rr.record_type(), WireType::A);
        match rr.data() {
            Some(RData::A(addr)) => assert_eq!(addr.0, Ipv4Addr::new(10, 0, 0, 1)),
            other => panic!("unexpected rdata: {other:?}"),
        }
    }

    #[test]
    fn aaaa_record_converts_to_sixteen_bytes() {
        let rr = record_to_rr(&zone_record(RecordType::Aaaa, "2001:db8::1")).unwrap();
        match rr.data() {
            Some(RData::AAAA(addr)) => {
                assert_eq!(addr.0, Ipv6Addr::from_str("2001:db8::1").unwrap())
            }
            other => panic!("unexpected rdata: {other:?}"),
        }
    }

    #[test]
    fn cname_target_is_canonicalized() {
        let rr = record_to_rr(&zone_record(RecordType::Cname, "Target.Example.Com")).unwrap();
        match rr.data() {
            Some(RData::CNAME(target)) => {
                assert_eq!(target.0.to_ascii().to_ascii_lowercase(), "target.example.com.")
            }
            other => panic!("unexpected rdata: {other:?}"),
        }
    }

    #[test]
    fn garbage_rdata_is_rejected() {
        assert!(record_to_rr(&zone_record(RecordType::A, "not-an-ip")).is_err());
    }

    #[test]
    fn authoritative_reply_carries_flags_and_answers() {
        let request = request_for(WireType::A);
        let response = authoritative_answer(&request, &[zone_record(RecordType::A, "10.0.0.1")]);
        assert!(response.authoritative());
        assert_eq!(response.response_code(), ResponseCode::NoError);
        assert_eq!(response.id(), 42);
        assert_eq!(response.answers().len(), 1);
    }

    #[test]
    fn nxdomain_reply_is_empty_and_authoritative() {
        let request = request_for(WireType::A);
        let response = negative_answer(&request, ResponseCode::NXDomain);
        assert!(response.authoritative());
        assert_eq!(response.response_code(), ResponseCode::NXDomain);
        assert_eq!(response.answers().len(), 0);
    }

    #[test]
    fn truncated_reply_sets_tc_and_drops_answers() {
        let request = request_for(WireType::A);
        let response = truncated(&request);
        assert!(response.truncated());
        assert_eq!(response.answers().len(), 0);
    }
}
