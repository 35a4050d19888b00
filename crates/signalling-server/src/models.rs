//! Domain models and wire conversions.

use proto_gen::signalling as proto;

/// A registered user.
///
/// The online flag is derived state driven by presence sessions.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct User {
    pub id: String,
    pub name: String,
    pub photo: String,
    pub online: bool,
}

/// A room including its current member set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub description: String,
    pub photo: String,
    pub members: Vec<User>,
}

impl From<User> for proto::User {
    fn from(user: User) -> Self {
        proto::User {
            id: user.id,
            name: user.name,
            photo: user.photo,
            online: user.online,
        }
    }
}

impl From<Room> for proto::Room {
    fn from(room: Room) -> Self {
        proto::Room {
            id: room.id,
            name: room.name,
            photo: room.photo,
            description: room.description,
            users: room.members.into_iter().map(Into::into).collect(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_user_to_proto() {
        let user = User {
            id: "u1".to_string(),
            name: "Jasmine Chan".to_string(),
            photo: "https://example.org/jasmine.png".to_string(),
            online: true,
        };

        let wire: proto::User = user.into();
        assert_eq!(wire.id, "u1");
        assert_eq!(wire.name, "Jasmine Chan");
        assert!(wire.online);
    }

    #[test]
    fn test_room_to_proto_carries_members() {
        let room = Room {
            id: "r1".to_string(),
            name: "standup".to_string(),
            description: "daily sync".to_string(),
            photo: String::new(),
            members: vec![User {
                id: "u1".to_string(),
                name: "Jasmine Chan".to_string(),
                photo: String::new(),
                online: false,
            }],
        };

        let wire: proto::Room = room.into();
        assert_eq!(wire.id, "r1");
        assert_eq!(wire.description, "daily sync");
        assert_eq!(wire.users.len(), 1);
        assert_eq!(wire.users[0].id, "u1");
    }
}
