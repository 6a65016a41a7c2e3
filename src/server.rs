use chrono::Local;
use std::{convert::Infallible, net::SocketAddr, sync::Arc};
use tokio::task;
use warp::{http::StatusCode, reply::Response, Filter, Rejection, Reply};

use crate::{
  error::HouseError,
  house::House,
  model::{AwayRequest, ErrorReply, ManualRequest, RoomBoostRequest, TemperatureRequest},
};

pub fn set_up_web_server(house: Arc<House>, addr: SocketAddr) {
  let routes = routes(house);
  log::info!("serving http on {}", addr);
  task::spawn(async move {
      warp::serve(routes)
      .run(addr)
      .await;
  });
}

fn with_house(house: Arc<House>) -> impl Filter<Extract = (Arc<House>,), Error = Infallible> + Clone {
  warp::any().map(move || house.clone())
}

pub fn routes(house: Arc<House>) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
  let state_route = warp::get()
      .and(warp::path!("state"))
      .and(with_house(house.clone()))
      .and_then(get_house_state);
  let away_route = warp::post()
      .and(warp::path!("away"))
      .and(warp::body::json())
      .and(with_house(house.clone()))
      .and_then(set_away);
  let away_temp_route = warp::post()
      .and(warp::path!("away_temp"))
      .and(warp::body::json())
      .and(with_house(house.clone()))
      .and_then(set_away_temp);
  let boost_all_route = warp::post()
      .and(warp::path!("boost_all"))
      .and(with_house(house.clone()))
      .and_then(boost_all);
  let cancel_route = warp::post()
      .and(warp::path!("cancel_overrides"))
      .and(with_house(house.clone()))
      .and_then(cancel_overrides);
  let manual_route = warp::post()
      .and(warp::path!("rooms" / String / "manual"))
      .and(warp::body::json())
      .and(with_house(house.clone()))
      .and_then(set_manual);
  let room_boost_route = warp::post()
      .and(warp::path!("rooms" / String / "boost"))
      .and(warp::body::json())
      .and(with_house(house))
      .and_then(boost_room);

  state_route
    .or(away_route)
    .unify()
    .or(away_temp_route)
    .unify()
    .or(boost_all_route)
    .unify()
    .or(cancel_route)
    .unify()
    .or(manual_route)
    .unify()
    .or(room_boost_route)
    .unify()
}

async fn house_state(house: &House) -> Response {
  warp::reply::json(&house.snapshot().await).into_response()
}

fn house_error(err: HouseError) -> Response {
  log::warn!("rejected request: {}", err);
  let status = match err {
    HouseError::UnknownRoom(_) => StatusCode::NOT_FOUND,
  };
  warp::reply::with_status(warp::reply::json(&ErrorReply { error: err.to_string() }), status).into_response()
}

async fn get_house_state(house: Arc<House>) -> Result<Response, Rejection> {
  Ok(house_state(&house).await)
}

async fn set_away(request: AwayRequest, house: Arc<House>) -> Result<Response, Rejection> {
  house.set_away(request.active, request.temperature, &Local::now()).await;
  Ok(house_state(&house).await)
}

async fn set_away_temp(request: TemperatureRequest, house: Arc<House>) -> Result<Response, Rejection> {
  house.set_away_temp(request.temperature, &Local::now()).await;
  Ok(house_state(&house).await)
}

async fn boost_all(house: Arc<House>) -> Result<Response, Rejection> {
  house.boost_all(&Local::now()).await;
  Ok(house_state(&house).await)
}

async fn cancel_overrides(house: Arc<House>) -> Result<Response, Rejection> {
  house.cancel_overrides(&Local::now()).await;
  Ok(house_state(&house).await)
}

async fn set_manual(room: String, request: ManualRequest, house: Arc<House>) -> Result<Response, Rejection> {
  match house.set_manual(&room, request.active, request.temperature, &Local::now()).await {
    Ok(()) => Ok(house_state(&house).await),
    Err(err) => Ok(house_error(err)),
  }
}

async fn boost_room(room: String, request: RoomBoostRequest, house: Arc<House>) -> Result<Response, Rejection> {
  match house.boost_room(&room, request.temperature, request.duration, &Local::now()).await {
    Ok(()) => Ok(house_state(&house).await),
    Err(err) => Ok(house_error(err)),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    room::{Room, Thermostat},
    schedule::WeeklySchedule,
    transport::testing::Recorder,
  };
  use bytes::Bytes;
  use serde_json::{json, Value};
  use tokio::sync::mpsc;

  fn house() -> Arc<House> {
    let (tx, _rx) = mpsc::unbounded_channel();
    let transport = Arc::new(Recorder::default());
    let room = Room::new(
      "living",
      vec![Thermostat { entity_id: "trv_living".to_string(), weight: 1.0 }],
      Arc::new(WeeklySchedule::default_week()),
      transport.clone(),
      tx.clone(),
    )
    .unwrap();
    Arc::new(House::new("home", vec![room], transport, tx).unwrap())
  }

  fn body(response: &warp::http::Response<Bytes>) -> Value {
    serde_json::from_slice(response.body()).unwrap()
  }

  #[tokio::test]
  async fn state_is_served_as_json() {
    let routes = routes(house());
    let response = warp::test::request().method("GET").path("/state").reply(&routes).await;
    assert_eq!(response.status(), StatusCode::OK);
    let state = body(&response);
    assert_eq!(state["name"], "home");
    assert_eq!(state["mode"], "Auto");
    assert_eq!(state["rooms"][0]["name"], "living");
  }

  #[tokio::test]
  async fn away_sets_every_room() {
    let house = house();
    let routes = routes(house.clone());
    let response = warp::test::request()
      .method("POST")
      .path("/away")
      .json(&json!({"active": true, "temperature": 12}))
      .reply(&routes)
      .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body(&response)["away_temp"], 12.0);
    assert_eq!(house.room("living").unwrap().lock().await.setpoint(), 12.0);
  }

  #[tokio::test]
  async fn command_reply_shows_new_setpoints() {
    let routes = routes(house());
    let response = warp::test::request()
      .method("POST")
      .path("/away")
      .json(&json!({"active": true, "temperature": 13.5}))
      .reply(&routes)
      .await;
    let state = body(&response);
    assert_eq!(state["mode"], "Away");
    assert_eq!(state["rooms"][0]["state"], "Away");
    assert_eq!(state["rooms"][0]["setpoint"], 13.5);
  }

  #[tokio::test]
  async fn manual_on_unknown_room_is_not_found() {
    let routes = routes(house());
    let response = warp::test::request()
      .method("POST")
      .path("/rooms/attic/manual")
      .json(&json!({"active": true, "temperature": 22}))
      .reply(&routes)
      .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body(&response)["error"], "no room named attic");
  }

  #[tokio::test(start_paused = true)]
  async fn room_boost_route() {
    let house = house();
    let routes = routes(house.clone());
    let response = warp::test::request()
      .method("POST")
      .path("/rooms/living/boost")
      .json(&json!({"temperature": 23.5, "duration": 30}))
      .reply(&routes)
      .await;
    assert_eq!(response.status(), StatusCode::OK);
    let room = house.room("living").unwrap();
    let room = room.lock().await;
    assert_eq!(room.setpoint(), 23.5);
    assert!(room.room_boost_timer().is_some());
  }

  #[tokio::test]
  async fn malformed_body_is_rejected() {
    let routes = routes(house());
    let response = warp::test::request()
      .method("POST")
      .path("/away_temp")
      .body("{}")
      .reply(&routes)
      .await;
    assert!(response.status().is_client_error());
  }
}
