use std::io::Read;

use crate::handler::{HandlerRequest, HandlerResponse};

// Example handler: echoes the request back, body included.
pub fn echo_handler(req: &HandlerRequest, body: &mut dyn Read) -> HandlerResponse {
    let mut buf = Vec::new();
    let body = match body.read_to_end(&mut buf) {
        Ok(_) => String::from_utf8_lossy(&buf).to_string(),
        Err(_) => String::new(),
    };
    HandlerResponse::json(
        200,
        serde_json::json!({
            "method": req.method.to_string(),
            "path": req.path,
            "params": req.path_params_map(),
            "query": req.get_query_param("q"),
            "body": body,
        }),
    )
}
