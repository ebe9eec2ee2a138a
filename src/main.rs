#[rocket::launch]
fn rocket() -> _ {
    tourbook_api::rocket()
}
