//! Out-of-dialog request handling the registration engine answers directly
//! (§4.3): OPTIONS/NOTIFY respond 200 OK with capability headers, anything
//! else gets 405.

use sip_message::{build_response, SipMessage};

const ALLOW: &str = "INVITE, ACK, BYE, CANCEL, OPTIONS, REGISTER, NOTIFY";
const ACCEPT: &str = "application/sdp";

/// Build the response for an out-of-dialog OPTIONS, NOTIFY, or unrecognized
/// request. Returns `None` for methods that belong to the call/dialog layer
/// (INVITE, ACK, BYE, CANCEL) instead of this responder.
pub fn respond_to(request: &SipMessage) -> Option<SipMessage> {
    let method = request.method()?;
    match method {
        "OPTIONS" | "NOTIFY" => {
            let mut response = build_response(request, 200, "OK", None);
            response.headers.push("Allow", ALLOW);
            response.headers.push("Accept", ACCEPT);
            Some(response)
        }
        "INVITE" | "ACK" | "BYE" | "CANCEL" | "REGISTER" => None,
        _ => Some(build_response(request, 405, "Method Not Allowed", None)),
    }
}
