use orchid::{api, conf::Conf, log, node::Node, prelude::*};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();

    let conf = match Conf::parse() {
        Ok(conf) => conf,
        Err(error) => {
            eprintln!("{}", error);
            std::process::exit(2);
        }
    };

    let _log_guard = log::init();
    info!("gateway starting");

    let node = Node::new(vec![conf.ice_stun_server.clone()]);
    api::run(conf.rendezvous_port, node).await
}
