use std::sync::Arc;
use std::time::Duration;

use mafia_protocol::Event;
use mafia_protocol::PlayerId;
use mafia_protocol::RoomVisibility;

use crate::MafiaGameServer;
use crate::MafiaGameServerConfig;
use crate::clock::Clock;
use crate::clock::TestClock;

fn server_with_clock() -> (MafiaGameServer, Arc<TestClock>) {
    let clock = Arc::new(TestClock::new());
    let config = MafiaGameServerConfig { clock: clock.clone() as Arc<dyn Clock>, ..MafiaGameServerConfig::default() };
    (MafiaGameServer::new(config), clock)
}

fn connect(server: &MafiaGameServer, credential: &str) -> (PlayerId, mafia_protocol::SessionToken) {
    server.connect(credential).unwrap()
}

#[test_log::test]
fn create_room_seats_the_host_and_acks_with_a_room_update() {
    let (server, _clock) = server_with_clock();
    let (host_id, host_token) = connect(&server, "host:Host");

    let info = server
        .create_room(host_token, "Parlor".into(), RoomVisibility::Public, None)
        .unwrap();

    assert_eq!(info.host_id, host_id);
    assert_eq!(info.players.len(), 1);
    assert!(!info.is_game_active);

    let events = server.take_events(host_token).unwrap();
    assert!(events.iter().any(|e| matches!(e, Event::RoomUpdated(_))));
}

#[test_log::test]
fn join_unknown_code_fails_with_room_not_found() {
    let (server, _clock) = server_with_clock();
    let (_id, token) = connect(&server, "host:Host");

    let err = server.join_room(token, mafia_protocol::RoomCode::normalize("ZZZZZZ"));
    assert!(matches!(err, Err(crate::MafiaGameError::RoomNotFound(_))));
}

#[test_log::test]
fn second_player_join_is_broadcast_to_the_host() {
    let (server, _clock) = server_with_clock();
    let (_host_id, host_token) = connect(&server, "host:Host");
    let info = server
        .create_room(host_token, "Parlor".into(), RoomVisibility::Public, None)
        .unwrap();
    let _ = server.take_events(host_token);

    let (guest_id, guest_token) = connect(&server, "guest:Guest");
    let (joined_info, is_reconnect) = server.join_room(guest_token, info.code.clone()).unwrap();
    assert!(!is_reconnect);
    assert_eq!(joined_info.players.len(), 2);

    let host_events = server.take_events(host_token).unwrap();
    assert!(host_events.iter().any(|e| matches!(e, Event::RoomPlayerJoined(p) if p.id == guest_id)));
}

#[test_log::test]
fn leave_room_transfers_host_to_the_next_player() {
    let (server, _clock) = server_with_clock();
    let (host_id, host_token) = connect(&server, "host:Host");
    let info = server
        .create_room(host_token, "Parlor".into(), RoomVisibility::Public, None)
        .unwrap();
    let (guest_id, guest_token) = connect(&server, "guest:Guest");
    server.join_room(guest_token, info.code.clone()).unwrap();

    server.leave_room(host_token).unwrap();

    let rooms = server.list_public_rooms();
    let room = rooms.iter().find(|r| r.code == info.code).unwrap();
    assert_eq!(room.host_id, guest_id);
    assert_eq!(room.players.len(), 1);
    assert_ne!(room.host_id, host_id);
}

#[test_log::test]
fn kick_player_requires_host_authorization() {
    let (server, _clock) = server_with_clock();
    let (_host_id, host_token) = connect(&server, "host:Host");
    let info = server
        .create_room(host_token, "Parlor".into(), RoomVisibility::Public, None)
        .unwrap();
    let (guest_id, guest_token) = connect(&server, "guest:Guest");
    server.join_room(guest_token, info.code.clone()).unwrap();

    let err = server.kick_player(guest_token, guest_id.clone());
    assert!(matches!(err, Err(crate::MafiaGameError::NotAuthorized(_))));

    server.kick_player(host_token, guest_id).unwrap();
    let rooms = server.list_public_rooms();
    assert_eq!(rooms.iter().find(|r| r.code == info.code).unwrap().players.len(), 1);
}

#[test_log::test]
fn list_public_rooms_hides_private_and_in_game_rooms() {
    let (server, _clock) = server_with_clock();
    let (_id, token) = connect(&server, "host:Host");
    server.create_room(token, "Hidden".into(), RoomVisibility::Private, None).unwrap();

    assert!(server.list_public_rooms().is_empty());
}

fn fill_room(server: &MafiaGameServer, n: usize) -> (mafia_protocol::RoomCode, Vec<(PlayerId, mafia_protocol::SessionToken)>) {
    let (host_id, host_token) = connect(server, "p0:P0");
    let info = server
        .create_room(host_token, "Parlor".into(), RoomVisibility::Public, None)
        .unwrap();
    let mut members = vec![(host_id, host_token)];
    for i in 1..n {
        let (id, token) = connect(server, &format!("p{i}:P{i}"));
        server.join_room(token, info.code.clone()).unwrap();
        members.push((id, token));
    }
    (info.code, members)
}

#[test_log::test]
fn game_start_requires_the_host() {
    let (server, _clock) = server_with_clock();
    let (code, members) = fill_room(&server, 4);
    let mut rng = rand::rng();

    let err = server.start_game(members[1].1, &mut rng);
    assert!(matches!(err, Err(crate::MafiaGameError::NotAuthorized(_))));

    server.start_game(members[0].1, &mut rng).unwrap();
    let rooms = server.list_public_rooms();
    assert!(rooms.iter().find(|r| r.code == code).is_none(), "an active game drops off the public listing");
}

#[test_log::test]
fn game_start_distributes_a_private_role_reveal_to_each_seat() {
    let (server, _clock) = server_with_clock();
    let (_code, members) = fill_room(&server, 4);
    let mut rng = rand::rng();
    server.start_game(members[0].1, &mut rng).unwrap();

    for (_, token) in &members {
        let events = server.take_events(*token).unwrap();
        assert!(events.iter().any(|e| matches!(e, Event::GameRoleReveal { .. })), "every seat gets its own role reveal");
    }
}

#[test_log::test]
fn mafia_chat_is_rejected_for_non_mafia_players_but_accepted_for_the_mafia() {
    let (server, _clock) = server_with_clock();
    let (_code, members) = fill_room(&server, 4);
    let mut rng = rand::rng();
    server.start_game(members[0].1, &mut rng).unwrap();

    let mut mafia_found = false;
    for (_id, token) in &members {
        match server.mafia_chat(*token, "hi".into()) {
            Ok(()) => {
                mafia_found = true;
                let events = server.take_events(*token).unwrap();
                assert!(events.iter().any(|e| matches!(e, Event::MafiaChat(_))));
            }
            Err(crate::MafiaGameError::NotAuthorized(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert!(mafia_found, "a 4-player game always assigns exactly one mafia member who can use mafia chat");
}

#[test_log::test]
fn day_chat_is_broadcast_to_the_whole_room() {
    let (server, _clock) = server_with_clock();
    let (_code, members) = fill_room(&server, 3);

    server.day_chat(members[0].1, "hello everyone".into()).unwrap();

    for (_, token) in &members {
        let events = server.take_events(*token).unwrap();
        assert!(events.iter().any(|e| matches!(e, Event::DayChat(m) if m.content == "hello everyone")));
    }
}

#[test_log::test]
fn day_chat_rejects_empty_or_oversized_content() {
    let (server, _clock) = server_with_clock();
    let (_code, members) = fill_room(&server, 3);

    assert!(matches!(
        server.day_chat(members[0].1, "   ".into()),
        Err(crate::MafiaGameError::InvalidChatContent)
    ));
    assert!(matches!(
        server.day_chat(members[0].1, "x".repeat(501)),
        Err(crate::MafiaGameError::InvalidChatContent)
    ));
}

#[test_log::test]
fn disconnect_and_reconnect_within_grace_resumes_the_same_seat() {
    let (server, _clock) = server_with_clock();
    let (code, members) = fill_room(&server, 3);
    let (guest_id, guest_token) = members[1].clone();

    server.disconnect(guest_token).unwrap();
    let rooms = server.list_public_rooms();
    let room = rooms.iter().find(|r| r.code == code).unwrap();
    assert!(!room.players.iter().find(|p| p.id == guest_id).unwrap().is_connected);

    let (_info, is_reconnect) = server.join_room(guest_token, code.clone()).unwrap();
    assert!(is_reconnect);

    let events = server.take_events(guest_token).unwrap();
    assert!(events.iter().any(|e| matches!(e, Event::PlayerReconnected(id) if *id == guest_id)));
}

#[test_log::test]
fn reconnect_mid_game_replays_role_reveal_state_and_chat_in_order() {
    let (server, _clock) = server_with_clock();
    let (code, members) = fill_room(&server, 4);
    let mut rng = rand::rng();
    server.start_game(members[0].1, &mut rng).unwrap();

    let (player_id, token) = members[2].clone();
    let _ = server.take_events(token);

    server.day_chat(members[0].1, "before the drop".into()).unwrap();
    server.disconnect(token).unwrap();
    server.day_chat(members[1].1, "while they're gone".into()).unwrap();

    let (_info, is_reconnect) = server.reconnect(token, code, player_id.clone()).unwrap();
    assert!(is_reconnect);

    let events = server.take_events(token).unwrap();
    let positions: Vec<&str> = events
        .iter()
        .map(|e| match e {
            Event::RoomUpdated(_) => "room",
            Event::GameRoleReveal { .. } => "role",
            Event::GameStateUpdate(_) => "state",
            Event::DayChat(_) => "chat",
            Event::PlayerReconnected(_) => "reconnected",
            _ => "other",
        })
        .collect();

    let room_pos = positions.iter().position(|p| *p == "room");
    let role_pos = positions.iter().position(|p| *p == "role");
    let state_pos = positions.iter().position(|p| *p == "state");
    let chat_positions: Vec<usize> = positions.iter().enumerate().filter(|(_, p)| **p == "chat").map(|(i, _)| i).collect();

    assert!(room_pos.unwrap() < role_pos.unwrap());
    assert!(role_pos.unwrap() < state_pos.unwrap());
    assert!(chat_positions.iter().all(|&i| i > state_pos.unwrap()));
    assert_eq!(chat_positions.len(), 2, "both pre- and post-disconnect chat history replay on reconnect");
}

#[test_log::test]
fn reconnect_rejects_a_mismatched_claimed_identity() {
    let (server, _clock) = server_with_clock();
    let (code, members) = fill_room(&server, 3);
    let (other_id, _) = members[1].clone();
    let (_id, token) = members[0].clone();

    server.disconnect(token).unwrap();
    let err = server.reconnect(token, code, other_id);
    assert!(matches!(err, Err(crate::MafiaGameError::NotAuthorized(_))));
}

#[test_log::test]
fn lobby_disconnect_grace_elapsing_removes_the_seat() {
    let (server, clock) = server_with_clock();
    let (code, members) = fill_room(&server, 3);
    let (guest_id, guest_token) = members[1].clone();

    server.disconnect(guest_token).unwrap();
    clock.advance(Duration::from_secs(3600));
    server.do_tick();

    let rooms = server.list_public_rooms();
    let room = rooms.iter().find(|r| r.code == code).unwrap();
    assert!(room.players.iter().find(|p| p.id == guest_id).is_none());
}

#[test_log::test]
fn rate_limiting_rejects_a_burst_beyond_the_token_bucket() {
    let (server, _clock) = server_with_clock();
    let (_code, members) = fill_room(&server, 3);
    let (_id, token) = members[0].clone();

    let mut last = Ok(());
    for _ in 0..64 {
        last = server.day_chat(token, "spam".into());
        if last.is_err() {
            break;
        }
    }
    assert!(matches!(last, Err(crate::MafiaGameError::RateLimited)), "a tight burst must eventually trip the limiter");
}

#[test_log::test]
fn game_tick_advances_phases_and_records_completion() {
    let (server, clock) = server_with_clock();
    let (code, members) = fill_room(&server, 3);
    let mut rng = rand::rng();
    server.start_game(members[0].1, &mut rng).unwrap();

    let mut guard = 0;
    loop {
        clock.advance(Duration::from_secs(600));
        server.do_tick();
        guard += 1;
        assert!(guard < 64, "game never concluded");
        if server.list_public_rooms().iter().any(|r| r.code == code) {
            // the room reappears in the public listing once the game ends
            // and is_game_active flips back to false.
            break;
        }
    }
}

#[test_log::test]
fn take_events_drains_the_queue_exactly_once() {
    let (server, _clock) = server_with_clock();
    let (_host_id, host_token) = connect(&server, "host:Host");
    server.create_room(host_token, "Parlor".into(), RoomVisibility::Public, None).unwrap();

    let first = server.take_events(host_token).unwrap();
    assert!(!first.is_empty());
    let second = server.take_events(host_token).unwrap();
    assert!(second.is_empty());
}
