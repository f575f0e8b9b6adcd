mod router {
    use pretty_assertions::assert_eq;
    use reactor_h1::auth::AuthMode;
    use reactor_h1::router::{HttpServiceRoute, MaskSegment, RouteHandler, RouteMask, ServiceRouter};
    use reactor_h1::websocket::{Message, Outbox};
    use reactor_h1::{Request, RequestParser, Response, Result, ServerOptions};

    fn ok(_: &Request, _: &mut Response<'_>) -> Result<()> {
        Ok(())
    }

    fn echo(message: Message, outbox: &mut Outbox) {
        outbox.send_binary(&message.payload());
    }

    fn get(path: &str) -> Request {
        let mut parser = RequestParser::new(ServerOptions::default());
        parser
            .process_fragment(format!("GET {} HTTP/1.1\r\n\r\n", path).as_bytes())
            .unwrap();
        parser.pop_request().unwrap()
    }

    fn router() -> ServiceRouter {
        let mut router = ServiceRouter::new();
        router.register(HttpServiceRoute::new("login", "/auth/login", ok).auth(AuthMode::Credential));
        router.register(HttpServiceRoute::new("file", "/files/*", ok).on_subtask());
        router.register(HttpServiceRoute::new("tree", "/files/**", ok).impersonate());
        router.register(HttpServiceRoute::websocket("console", "/ws/*/console", echo, ["console.v1"]));
        router.register(HttpServiceRoute::new("fallback", "/**", ok));
        router
    }

    fn routed(path: &str) -> String {
        router().find(&get(path)).unwrap().name().to_string()
    }

    #[test]
    fn resolution_order() {
        assert_eq!(routed("/auth/login"), "login");
        assert_eq!(routed("/files/a.txt"), "file");
        assert_eq!(routed("/files"), "tree");
        assert_eq!(routed("/files/dir/a.txt"), "tree");
        assert_eq!(routed("/ws/lpar1/console"), "console");
        assert_eq!(routed("/auth/login/extra"), "fallback");
        assert_eq!(routed("/"), "fallback");
    }

    #[test]
    fn segments_are_decoded_before_matching() {
        assert_eq!(routed("/files/a%20b.txt"), "file");
        assert_eq!(routed("/auth/log%69n"), "login");
    }

    #[test]
    fn route_attributes() {
        let router = router();
        let login = router.find_segments(&["auth", "login"]).unwrap();
        assert_eq!(login.auth_mode(), AuthMode::Credential);
        assert!(!login.runs_on_subtask());

        assert!(router.find_segments(&["files", "x"]).unwrap().runs_on_subtask());
        assert!(router.find_segments(&["files", "x", "y"]).unwrap().impersonates());

        let console = router.find_segments(&["ws", "a", "console"]).unwrap();
        match console.handler() {
            RouteHandler::WebSocket { protocols, .. } => assert_eq!(protocols, &["console.v1"]),
            RouteHandler::Http(_) => panic!("expected a websocket route"),
        }
        assert_eq!(router.len(), 5);
    }

    #[test]
    fn no_match_without_fallback() {
        let mut router = ServiceRouter::new();
        assert!(router.is_empty());
        router.register(HttpServiceRoute::new("one", "/one", ok));
        assert!(router.find(&get("/two")).is_none());
        assert!(router.find(&get("/one/more")).is_none());
    }

    #[test]
    fn inner_double_star_is_single_segment() {
        let mask = RouteMask::parse("/a/**/c");
        assert_eq!(
            mask.segments(),
            [
                MaskSegment::Literal("a".into()),
                MaskSegment::Any,
                MaskSegment::Literal("c".into())
            ]
        );
        assert!(mask.matches(&["a", "b", "c"]));
        assert!(!mask.matches(&["a", "b", "b", "c"]));
    }
}
