//! Reusable scenarios for forwarding simulations.
//!
//! Topologies, workloads and seeds that tests compose.

/// Standard topologies.
pub mod topologies {
    /// Three servers in a row.
    pub const THREE_SERVERS: u64 = 3;

    /// Five servers, for longer forwarding chains.
    pub const FIVE_SERVERS: u64 = 5;
}

/// Traffic generators.
pub mod workloads {
    use meridian_core::{ObjectId, ServerId};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    use crate::simulation::Simulation;

    /// First object id hosted by `server`.
    #[must_use]
    pub const fn object_base(server: ServerId) -> u64 {
        server.get() * 1000
    }

    /// Objects spread evenly over every server, each sending to objects
    /// chosen uniformly at random.
    #[derive(Debug, Clone, Copy)]
    pub struct UniformTraffic {
        /// Objects connected to each server.
        pub objects_per_server: u64,
        /// Messages sent per step, across all servers.
        pub messages_per_step: u32,
        /// Steps during which traffic is sent.
        pub steps: u32,
        /// Application payload per message.
        pub payload_bytes: usize,
    }

    impl Default for UniformTraffic {
        fn default() -> Self {
            Self {
                objects_per_server: 8,
                messages_per_step: 4,
                steps: 200,
                payload_bytes: 64,
            }
        }
    }

    /// One object sending to one remote object.
    #[derive(Debug, Clone, Copy)]
    pub struct Flow {
        /// Server hosting the sender.
        pub server: ServerId,
        /// Sending object.
        pub from: ObjectId,
        /// Receiving object.
        pub to: ObjectId,
    }

    impl UniformTraffic {
        /// Connects this workload's objects to their home servers.
        pub fn place(&self, sim: &mut Simulation) {
            for server in sim.server_ids() {
                for i in 0..self.objects_per_server {
                    sim.place_object(ObjectId::new(object_base(server) + i), server);
                }
            }
        }

        /// Draws a random flow.
        pub fn flow(&self, sim: &Simulation, rng: &mut ChaCha8Rng) -> Flow {
            let servers = sim.server_ids();
            let server = servers[rng.gen_range(0..servers.len())];
            let dest_server = servers[rng.gen_range(0..servers.len())];
            Flow {
                server,
                from: ObjectId::new(object_base(server) + rng.gen_range(0..self.objects_per_server)),
                to: ObjectId::new(
                    object_base(dest_server) + rng.gen_range(0..self.objects_per_server),
                ),
            }
        }

        /// Sends the workload, one batch per step, and returns the ids of
        /// the messages sent. Refused messages are included; their drops
        /// are traced.
        pub fn run(&self, sim: &mut Simulation, seed: u64) -> Vec<meridian_core::MessageId> {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let mut sent = Vec::new();
            for _ in 0..self.steps {
                for _ in 0..self.messages_per_step {
                    let flow = self.flow(sim, &mut rng);
                    let msg = sim.message(flow.from, flow.to, self.payload_bytes);
                    sent.push(msg.id);
                    let _ = sim.send(flow.server, msg);
                }
                sim.step();
            }
            sent
        }
    }
}

/// Seeds for reproducible runs.
pub mod seeds {
    /// Seeds run by every randomized test.
    pub const REGRESSION_SEEDS: &[u64] = &[42, 12345, 0xDEAD_BEEF, 999, 7777];
}
