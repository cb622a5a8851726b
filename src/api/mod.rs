use rocket::Route;

mod ballot;
mod operator;
mod peer;

pub(crate) use peer::refusal_for_peer;

pub fn routes() -> Vec<Route> {
    let mut routes = Vec::new();
    routes.extend(ballot::routes());
    routes.extend(operator::routes());
    routes.extend(peer::routes());
    routes
}
