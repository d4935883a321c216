//! The id kinds callhub hands out. Prefixes are part of the wire format
//! and must stay unique.

use crate::define_id;

define_id!(ProjectId, "prj");
define_id!(AgentId, "agt");
define_id!(ContactId, "cnt");
define_id!(CampaignId, "cmp");
define_id!(CallId, "call");

// One running agent worker process.
define_id!(InstanceId, "inst");
// One `deploy` request, shared by the replicas it started.
define_id!(DeploymentId, "dep");
