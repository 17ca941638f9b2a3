#[macro_use]
extern crate rocket;

pub mod api;
pub mod common;
pub mod config;
pub mod models;
pub mod utils;
pub mod workflow;

use rocket::data::{Limits, ToByteUnit};
use rocket::fs::{FileServer, Options};

use crate::api::AppContext;
use crate::api::handlers::{
    generate_export_routes, generate_media_routes, generate_system_routes,
};
use crate::config::AppConfig;

pub fn build_rocket(config: AppConfig) -> rocket::Rocket<rocket::Build> {
    let upload_limit = config.upload_limit_mb.mebibytes();
    let limits = Limits::default()
        .limit("file", upload_limit)
        .limit("data-form", upload_limit);
    let figment = rocket::Config::figment().merge(("limits", limits));
    let static_dir = config.static_dir.clone();

    rocket::custom(figment)
        .manage(AppContext::new(config))
        .mount("/static", FileServer::new(static_dir, Options::Missing))
        .mount("/", generate_media_routes())
        .mount("/", generate_system_routes())
        .mount("/", generate_export_routes())
}
