//! Signaling HTTP endpoint: one `POST /` turning an SDP offer into an
//! answer.

use std::{io, sync::Arc};

use actix_web::{
    middleware,
    web::{self, Bytes, Data},
    App, HttpResponse, HttpServer,
};

use crate::{node::Node, prelude::*};

/// Runs the signaling server on `0.0.0.0:port` until shut down by signal.
///
/// `POST /` reads the request body as an SDP offer and replies with the
/// answer as `text/plain`, or an empty `404` when responding fails. Every
/// other route gets an empty `200`.
///
/// # Errors
///
/// [`io::Error`] when the listen socket cannot be bound.
pub async fn run(port: u16, node: Arc<Node>) -> io::Result<()> {
    info!("signaling on 0.0.0.0:{}", port);
    HttpServer::new(move || {
        App::new()
            .app_data(Data::new(Arc::clone(&node)))
            .wrap(middleware::Logger::default())
            .service(
                web::resource("/")
                    .route(web::post().to(respond))
                    .default_service(web::to(ignore)),
            )
            .default_service(web::route().to(ignore))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

/// `POST /` handler: offer in, answer out.
async fn respond(node: Data<Arc<Node>>, body: Bytes) -> HttpResponse {
    use crate::node::Back as _;

    let offer = match String::from_utf8(body.to_vec()) {
        Ok(offer) => offer,
        Err(error) => {
            warn!("offer is not UTF-8: {}", error);
            return HttpResponse::NotFound().finish();
        }
    };
    match node.respond(&offer).await {
        Ok(answer) => {
            HttpResponse::Ok().content_type("text/plain").body(answer)
        }
        Err(error) => {
            warn!("offer rejected: {}", error);
            HttpResponse::NotFound().finish()
        }
    }
}

async fn ignore() -> HttpResponse {
    HttpResponse::Ok().content_type("text/plain").body("")
}
