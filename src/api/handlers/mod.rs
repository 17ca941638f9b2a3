use rocket::Route;

pub mod export;
pub mod media;
pub mod system;

pub fn generate_media_routes() -> Vec<Route> {
    routes![
        media::index,
        media::catrat,
        media::display_image,
        media::get_flash,
        media::upload_index,
        media::upload,
    ]
}

pub fn generate_system_routes() -> Vec<Route> {
    routes![
        system::submit,
        system::try_again,
        system::get_progress,
        system::get_catrat,
        system::get_jobs,
        system::get_job,
    ]
}

pub fn generate_export_routes() -> Vec<Route> {
    routes![export::download]
}
